use super::handle::Handle;
use super::memory::ZMemory;
use super::result::Result;
use super::traits::PC;
use super::version::ZVersion;

// Locations in the story are addressed using ZOffsets. The ZOffset is an
// index into story memory. The machine itself uses three kinds of address
// (byte, word, packed) which each map to a ZOffset in a different way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZOffset(usize);

impl ZOffset {
    pub fn value(self) -> usize {
        self.0
    }

    pub fn inc_by(self, delta: usize) -> ZOffset {
        ZOffset(self.0 + delta)
    }
}

impl From<usize> for ZOffset {
    fn from(val: usize) -> ZOffset {
        ZOffset(val)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteAddress(u16);

impl ByteAddress {
    pub fn from_raw(word: u16) -> ByteAddress {
        ByteAddress(word)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    // Offset arithmetic widens to usize so table math near the top of the
    // 64K range cannot wrap to a low address.
    pub fn inc_by(self, delta: usize) -> ZOffset {
        ZOffset(usize::from(self.0) + delta)
    }
}

impl From<ByteAddress> for ZOffset {
    fn from(ba: ByteAddress) -> ZOffset {
        ZOffset(usize::from(ba.0))
    }
}

// Word addresses index 2-byte cells. Only the abbreviation table uses them.
#[derive(Clone, Copy, Debug)]
pub struct WordAddress(u16);

impl WordAddress {
    pub fn from_raw(word: u16) -> WordAddress {
        WordAddress(word)
    }
}

impl From<WordAddress> for ZOffset {
    fn from(wa: WordAddress) -> ZOffset {
        ZOffset(usize::from(wa.0) * 2)
    }
}

// Routine and string addresses arrive packed; the version supplies the
// multiplier.
#[derive(Clone, Copy, Debug)]
pub struct PackedAddress {
    val: u16,
    multiplier: usize,
}

impl PackedAddress {
    pub fn new(val: u16, version: ZVersion) -> PackedAddress {
        PackedAddress {
            val,
            multiplier: version.packed_multiplier(),
        }
    }

    pub fn is_null(self) -> bool {
        self.val == 0
    }
}

impl From<PackedAddress> for ZOffset {
    fn from(pa: PackedAddress) -> ZOffset {
        ZOffset(usize::from(pa.val) * pa.multiplier)
    }
}

// The program counter: a cursor over story memory. Every fetch is
// bounds-checked by the memory it reads from.
pub struct ZPC {
    pc: usize,
    mem_h: Handle<ZMemory>,
}

impl ZPC {
    pub fn new<T>(mem_h: &Handle<ZMemory>, start_pc: T) -> ZPC
    where
        T: Into<ZOffset>,
    {
        ZPC {
            pc: start_pc.into().value(),
            mem_h: mem_h.clone(),
        }
    }
}

impl PC for ZPC {
    fn current_pc(&self) -> usize {
        self.pc
    }

    fn set_pc(&mut self, to: usize) {
        self.pc = to;
    }

    fn offset_pc(&mut self, by: isize) {
        if by < 0 {
            self.pc -= -by as usize;
        } else {
            self.pc += by as usize;
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        let byte = self.mem_h.borrow().read_byte(ZOffset(self.pc))?;
        self.pc += 1;
        Ok(byte)
    }
}

#[cfg(test)]
mod test {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_address_mapping() {
        assert_eq!(0x0123, ZOffset::from(ByteAddress::from_raw(0x0123)).value());
        assert_eq!(0x0246, ZOffset::from(WordAddress::from_raw(0x0123)).value());
        assert_eq!(
            0x0246,
            ZOffset::from(PackedAddress::new(0x0123, ZVersion::V3)).value()
        );
    }

    #[test]
    fn test_byte_address_inc_does_not_wrap() {
        let near_top = ByteAddress::from_raw(0xfffe);
        assert_eq!(0x1000d, near_top.inc_by(0x0f).value());
    }

    #[test]
    fn test_pc_fetch() {
        let (mem_h, _) = fixtures::test_story(&[]);
        let mut pc = ZPC::new(&mem_h, ByteAddress::from_raw(0));
        assert_eq!(3, pc.next_byte().unwrap()); // version byte
        assert_eq!(1, pc.current_pc());

        pc.offset_pc(4);
        assert_eq!(5, pc.current_pc());
        pc.offset_pc(-5);
        assert_eq!(0, pc.current_pc());
        assert_eq!(0x0300, pc.next_word().unwrap() & 0xff00);
    }

    #[test]
    fn test_pc_fetch_past_end() {
        let (mem_h, _) = fixtures::test_story(&[]);
        let len = mem_h.borrow().len();
        let mut pc = ZPC::new(&mem_h, len);
        assert!(pc.next_byte().is_err());
    }
}
