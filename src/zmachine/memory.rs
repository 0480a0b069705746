use std::io::Read;

use log::debug;

use super::addressing::ZOffset;
use super::constants::HEADER_LEN;
use super::handle::{new_handle, Handle};
use super::header::{ZHeader, OS_FLAGS1, OS_FLAGS2, OS_FLAGS2_LOW};
use super::result::{Result, ZErr};

// The loaded story image. All reads and writes funnel through here and are
// bounds-checked; the write path additionally enforces the region rules:
// static memory and the header are read-only, except for the two Flags 2
// bytes the game itself may toggle.
//
// A pristine copy of the image is kept from load time for restart and for
// checksum verification.
pub struct ZMemory {
    bytes: Vec<u8>,
    pristine: Vec<u8>,
    static_base: usize,
}

impl ZMemory {
    // Read a story from rdr, consuming it entirely. Fails if the header is
    // inconsistent with the number of bytes actually read.
    pub fn new<T: Read>(rdr: &mut T) -> Result<(Handle<ZMemory>, ZHeader)> {
        let mut byte_vec = Vec::<u8>::new();
        rdr.read_to_end(&mut byte_vec)?;

        if byte_vec.len() < HEADER_LEN {
            return Err(ZErr::StoryTooShort(byte_vec.len()));
        }

        let len = byte_vec.len();
        let story_h = new_handle(ZMemory {
            bytes: byte_vec,
            pristine: Vec::new(),
            static_base: len,
        });

        // Header construction validates every declared address against the
        // image length before anything dereferences them.
        let header = ZHeader::new(&story_h)?;

        let static_base = ZOffset::from(header.static_mem_base()?).value();
        {
            let mut mem = story_h.borrow_mut();
            mem.static_base = static_base;

            // Status line, screen split, and font choices are all host
            // concerns this core does not provide.
            let flags1 = mem.bytes[usize::from(OS_FLAGS1)];
            mem.bytes[usize::from(OS_FLAGS1)] = (flags1 | 0b0001_0000) & !0b0110_0000;

            mem.pristine = mem.bytes.clone();
        }

        debug!(
            "loaded {} byte story, static memory from {:#06x}",
            story_h.borrow().len(),
            story_h.borrow().static_base
        );

        Ok((story_h, header))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn static_base(&self) -> usize {
        self.static_base
    }

    pub fn read_byte<T>(&self, at: T) -> Result<u8>
    where
        T: Into<ZOffset>,
    {
        let offset = at.into().value();
        if offset >= self.bytes.len() {
            return Err(ZErr::AddressOutOfRange {
                addr: offset,
                len: self.bytes.len(),
            });
        }
        Ok(self.bytes[offset])
    }

    pub fn read_word<T>(&self, at: T) -> Result<u16>
    where
        T: Into<ZOffset>,
    {
        let offset = at.into().value();
        if offset + 1 >= self.bytes.len() {
            return Err(ZErr::AddressOutOfRange {
                addr: offset,
                len: self.bytes.len(),
            });
        }
        Ok((u16::from(self.bytes[offset]) << 8) + u16::from(self.bytes[offset + 1]))
    }

    pub fn write_byte<T>(&mut self, at: T, val: u8) -> Result<()>
    where
        T: Into<ZOffset>,
    {
        let offset = at.into().value();
        self.check_writable(offset)?;
        self.bytes[offset] = val;
        Ok(())
    }

    pub fn write_word<T>(&mut self, at: T, val: u16) -> Result<()>
    where
        T: Into<ZOffset>,
    {
        let offset = at.into().value();
        self.check_writable(offset)?;
        self.check_writable(offset + 1)?;
        self.bytes[offset] = (val >> 8) as u8;
        self.bytes[offset + 1] = (val & 0xff) as u8;
        Ok(())
    }

    fn check_writable(&self, offset: usize) -> Result<()> {
        if offset >= self.bytes.len() {
            return Err(ZErr::AddressOutOfRange {
                addr: offset,
                len: self.bytes.len(),
            });
        }
        if offset >= self.static_base {
            return Err(ZErr::ReadOnlyAddress(offset));
        }
        // Within the header only the Flags 2 word is game-writable.
        if offset < HEADER_LEN
            && offset != usize::from(OS_FLAGS2)
            && offset != usize::from(OS_FLAGS2_LOW)
        {
            return Err(ZErr::ReadOnlyAddress(offset));
        }
        Ok(())
    }

    // Rewind dynamic memory to its load-time contents. The transcript and
    // fixed-font bits of Flags 2 survive a restart.
    pub fn reset_dynamic(&mut self) {
        let keep = self.bytes[usize::from(OS_FLAGS2_LOW)] & 0b11;
        let base = self.static_base.min(self.bytes.len());
        self.bytes[..base].copy_from_slice(&self.pristine[..base]);
        let low = usize::from(OS_FLAGS2_LOW);
        self.bytes[low] = (self.bytes[low] & !0b11) | keep;
    }

    pub fn dynamic_bytes(&self) -> &[u8] {
        &self.bytes[..self.static_base.min(self.bytes.len())]
    }

    pub fn restore_dynamic(&mut self, data: &[u8]) -> Result<()> {
        let base = self.static_base.min(self.bytes.len());
        if data.len() != base {
            return Err(ZErr::MalformedSnapshot("dynamic memory length"));
        }
        self.bytes[..base].copy_from_slice(data);
        Ok(())
    }

    // Checksum as the original compilers computed it: the sum of all bytes
    // from the end of the header to the declared file length, mod 0x10000.
    // Computed over the pristine image so runtime writes don't perturb it.
    pub fn image_checksum(&self, file_length: usize) -> u16 {
        let end = file_length.min(self.pristine.len());
        let mut sum = 0u16;
        for byte in &self.pristine[HEADER_LEN.min(end)..end] {
            sum = sum.wrapping_add(u16::from(*byte));
        }
        sum
    }
}

#[cfg(test)]
mod test {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_read_bytes_and_words() {
        let (mem_h, _) = fixtures::test_story(&[(0x100, 0xcc), (0x101, 0xdd)]);
        let mem = mem_h.borrow();

        assert_eq!(3, mem.read_byte(0usize).unwrap());
        assert_eq!(0xcc, mem.read_byte(0x100usize).unwrap());
        assert_eq!(0xccdd, mem.read_word(0x100usize).unwrap());
        // Unaligned word reads are legal.
        assert_eq!(0xdd00, mem.read_word(0x101usize).unwrap());
    }

    #[test]
    fn test_read_past_end() {
        let (mem_h, _) = fixtures::test_story(&[]);
        let mem = mem_h.borrow();
        let len = mem.len();

        assert!(mem.read_byte(len).is_err());
        assert!(mem.read_word(len - 1).is_err());
        assert!(mem.read_word(len - 2).is_ok());
    }

    #[test]
    fn test_write_regions() {
        let (mem_h, _) = fixtures::test_story(&[]);
        let mut mem = mem_h.borrow_mut();

        // Dynamic memory is writable.
        mem.write_byte(0x100usize, 0x42).unwrap();
        assert_eq!(0x42, mem.read_byte(0x100usize).unwrap());

        // Static memory is not.
        let static_base = mem.static_base();
        match mem.write_byte(static_base, 0) {
            Err(ZErr::ReadOnlyAddress(addr)) => assert_eq!(static_base, addr),
            other => panic!("static write: {:?}", other),
        }

        // The header is not, except for Flags 2.
        assert!(mem.write_byte(0x06usize, 0).is_err());
        assert!(mem.write_word(0x10usize, 0x0003).is_ok());
    }

    #[test]
    fn test_reset_dynamic_preserves_flags2() {
        let (mem_h, _) = fixtures::test_story(&[]);
        let mut mem = mem_h.borrow_mut();

        mem.write_byte(0x100usize, 0x42).unwrap();
        mem.write_word(0x10usize, 0x0001).unwrap(); // transcript bit on

        mem.reset_dynamic();
        assert_eq!(0, mem.read_byte(0x100usize).unwrap());
        assert_eq!(0x0001, mem.read_word(0x10usize).unwrap());
    }

    #[test]
    fn test_truncated_story_is_rejected() {
        use std::io::Cursor;
        let bytes = fixtures::basic_story_bytes();
        match ZMemory::new(&mut Cursor::new(&bytes[..0x20])) {
            Err(ZErr::StoryTooShort(len)) => assert_eq!(0x20, len),
            other => panic!("truncated story: {:?}", other.map(|_| ())),
        }
    }
}
