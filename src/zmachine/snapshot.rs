use super::header::ZHeader;
use super::memory::ZMemory;
use super::result::{Result, ZErr};
use super::stack::ZStack;

const MAGIC: &[u8; 4] = b"ZSS3";
const FORMAT: u8 = 1;

// Exactly the state needed to resume a run: pc, both stacks (which share
// one array), and dynamic memory. The release/serial/checksum triple
// identifies which story the state belongs to, so a snapshot can refuse
// to be applied to the wrong image.
pub struct ZSnapshot {
    release: u16,
    serial: [u8; 6],
    checksum: u16,
    pc: usize,
    stack: Vec<u8>,
    fp: usize,
    frames: usize,
    dynamic: Vec<u8>,
}

impl ZSnapshot {
    pub fn capture(
        header: &ZHeader,
        mem: &ZMemory,
        stack: &ZStack,
        pc: usize,
    ) -> Result<ZSnapshot> {
        let (stack_bytes, fp, frames) = stack.raw();
        Ok(ZSnapshot {
            release: header.release()?,
            serial: header.serial()?,
            checksum: header.checksum()?,
            pc,
            stack: stack_bytes.to_vec(),
            fp,
            frames,
            dynamic: mem.dynamic_bytes().to_vec(),
        })
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    // Guard against applying the snapshot to some other story.
    pub fn matches_story(&self, header: &ZHeader) -> Result<()> {
        if self.release != header.release()? {
            return Err(ZErr::SnapshotMismatch("release"));
        }
        if self.serial != header.serial()? {
            return Err(ZErr::SnapshotMismatch("serial"));
        }
        if self.checksum != header.checksum()? {
            return Err(ZErr::SnapshotMismatch("checksum"));
        }
        Ok(())
    }

    pub fn apply(&self, mem: &mut ZMemory, stack: &mut ZStack) -> Result<()> {
        mem.restore_dynamic(&self.dynamic)?;
        stack.restore_raw(&self.stack, self.fp, self.frames)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.stack.len() + self.dynamic.len());
        out.extend_from_slice(MAGIC);
        out.push(FORMAT);
        push_u16(&mut out, self.release);
        out.extend_from_slice(&self.serial);
        push_u16(&mut out, self.checksum);
        push_u32(&mut out, self.pc as u32);
        push_u32(&mut out, self.fp as u32);
        push_u32(&mut out, self.frames as u32);
        push_u32(&mut out, self.stack.len() as u32);
        out.extend_from_slice(&self.stack);
        push_u32(&mut out, self.dynamic.len() as u32);
        out.extend_from_slice(&self.dynamic);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ZSnapshot> {
        let mut rdr = SnapshotReader { bytes, at: 0 };

        if rdr.take(4)? != MAGIC {
            return Err(ZErr::MalformedSnapshot("bad magic"));
        }
        if rdr.take(1)?[0] != FORMAT {
            return Err(ZErr::MalformedSnapshot("unknown format"));
        }

        let release = rdr.u16()?;
        let mut serial = [0u8; 6];
        serial.copy_from_slice(rdr.take(6)?);
        let checksum = rdr.u16()?;
        let pc = rdr.u32()? as usize;
        let fp = rdr.u32()? as usize;
        let frames = rdr.u32()? as usize;
        let stack_len = rdr.u32()? as usize;
        let stack = rdr.take(stack_len)?.to_vec();
        let dynamic_len = rdr.u32()? as usize;
        let dynamic = rdr.take(dynamic_len)?.to_vec();

        Ok(ZSnapshot {
            release,
            serial,
            checksum,
            pc,
            stack,
            fp,
            frames,
            dynamic,
        })
    }
}

fn push_u16(out: &mut Vec<u8>, val: u16) {
    out.extend_from_slice(&val.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, val: u32) {
    out.extend_from_slice(&val.to_be_bytes());
}

struct SnapshotReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> SnapshotReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.at + n > self.bytes.len() {
            return Err(ZErr::MalformedSnapshot("truncated"));
        }
        let slice = &self.bytes[self.at..self.at + n];
        self.at += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok((u16::from(b[0]) << 8) + u16::from(b[1]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok((u32::from(b[0]) << 24) + (u32::from(b[1]) << 16) + (u32::from(b[2]) << 8)
            + u32::from(b[3]))
    }
}

#[cfg(test)]
mod test {
    use super::super::fixtures;
    use super::*;

    fn sample() -> ZSnapshot {
        let (mem_h, header) = fixtures::test_story(&[(0x100, 0x42)]);
        let mut stack = ZStack::new();
        stack.push_word(0x1234).unwrap();
        let snap = ZSnapshot::capture(&header, &mem_h.borrow(), &stack, 0x0456).unwrap();
        snap
    }

    #[test]
    fn test_round_trip() {
        let snap = sample();
        let restored = ZSnapshot::from_bytes(&snap.to_bytes()).unwrap();

        assert_eq!(snap.pc(), restored.pc());
        assert_eq!(snap.release, restored.release);
        assert_eq!(snap.serial, restored.serial);
        assert_eq!(snap.stack, restored.stack);
        assert_eq!(snap.dynamic, restored.dynamic);
        assert_eq!(0x42, restored.dynamic[0x100]);
    }

    #[test]
    fn test_truncation_detected() {
        let bytes = sample().to_bytes();
        for end in [3usize, 8, 20, bytes.len() - 1].iter() {
            match ZSnapshot::from_bytes(&bytes[..*end]) {
                Err(ZErr::MalformedSnapshot(_)) => (),
                _ => panic!("truncated snapshot at {} accepted", end),
            }
        }
    }

    #[test]
    fn test_story_mismatch_detected() {
        let snap = sample();
        let (_, header) = fixtures::test_story(&[(0x100, 0x42)]);
        // Same story: matches.
        snap.matches_story(&header).unwrap();

        // Different release word.
        let mut bytes = fixtures::basic_story_bytes();
        bytes[0x03] = 9;
        let (_, other) = fixtures::story_from_bytes(&bytes);
        match snap.matches_story(&other) {
            Err(ZErr::SnapshotMismatch("release")) => (),
            other => panic!("mismatch: {:?}", other),
        }
    }

    #[test]
    fn test_apply_restores_state() {
        let (mem_h, header) = fixtures::test_story(&[]);
        {
            let mut mem = mem_h.borrow_mut();
            mem.write_byte(0x100usize, 0x42).unwrap();
        }
        let mut stack = ZStack::new();
        stack.push_word(0xaaaa).unwrap();
        let snap =
            ZSnapshot::capture(&header, &mem_h.borrow(), &stack, 0x500).unwrap();

        // Perturb, then roll back.
        mem_h.borrow_mut().write_byte(0x100usize, 0).unwrap();
        stack.pop_word().unwrap();
        stack.push_frame(1, None, &[]).unwrap();

        snap.apply(&mut mem_h.borrow_mut(), &mut stack).unwrap();
        assert_eq!(0x42, mem_h.borrow().read_byte(0x100usize).unwrap());
        assert_eq!(0, stack.frame_count());
        assert_eq!(0xaaaa, stack.pop_word().unwrap());
    }
}
