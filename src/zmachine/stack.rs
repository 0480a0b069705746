use super::constants::STACK_SIZE;
use super::opcodes::ZVariable;
use super::result::{Result, ZErr};

// One byte array carries both the call frames and the evaluation stack.
//
// Stack frame:
//   prev fp (u16)      - offset in the stack of the caller's frame
//   return PC (u32)    - pc of the continuation after this call returns
//   return var (u8)    - encoded variable for the result, 0xff to discard
//   num_locals (u8)    - number of words for local variables
//   N * local (u16)
//   eval stack...
//
// The evaluation stack of the newest frame grows from the end of its
// locals to the stack top; popping below that boundary is underflow, so
// one routine can never eat a caller's temporaries.
const FRAME_HEADER: usize = 8;
const NO_PREV_FP: u16 = 0xffff;
const DISCARD_RESULT: u8 = 0xff;

pub struct ZStack {
    stack: [u8; STACK_SIZE],
    fp: usize,
    sp: usize, // points to the next empty byte
    frames: usize,
}

impl ZStack {
    pub fn new() -> ZStack {
        let mut zs = ZStack {
            stack: [0; STACK_SIZE],
            fp: 0,
            sp: 0,
            frames: 0,
        };
        zs.push_base_frame();
        zs
    }

    // The base pseudo-frame: no caller, no continuation, no locals. It
    // exists so the main routine has an evaluation stack to work with.
    fn push_base_frame(&mut self) {
        self.set_word(0, NO_PREV_FP);
        self.set_word(2, 0);
        self.set_word(4, 0);
        self.stack[6] = DISCARD_RESULT;
        self.stack[7] = 0;
        self.sp = FRAME_HEADER;
        self.fp = 0;
    }

    pub fn clear(&mut self) {
        self.fp = 0;
        self.sp = 0;
        self.frames = 0;
        self.push_base_frame();
    }

    // Count of real (non-base) frames.
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    fn push_byte(&mut self, byte: u8) -> Result<()> {
        if self.sp >= STACK_SIZE {
            return Err(ZErr::StackOverflow);
        }
        self.stack[self.sp] = byte;
        self.sp += 1;
        Ok(())
    }

    fn push_addr(&mut self, addr: usize) -> Result<()> {
        self.push_word((addr >> 16 & 0xffff) as u16)?;
        self.push_word((addr & 0xffff) as u16)
    }

    fn word_at(&self, at: usize) -> u16 {
        (u16::from(self.stack[at]) << 8) + u16::from(self.stack[at + 1])
    }

    fn set_word(&mut self, at: usize, word: u16) {
        self.stack[at] = (word >> 8) as u8;
        self.stack[at + 1] = (word & 0xff) as u8;
    }

    fn num_locals(&self) -> u8 {
        self.stack[self.fp + 7]
    }

    // First byte above the current frame's locals: the floor of its
    // evaluation stack.
    fn eval_base(&self) -> usize {
        self.fp + FRAME_HEADER + 2 * usize::from(self.num_locals())
    }

    pub fn push_word(&mut self, word: u16) -> Result<()> {
        if self.sp + 2 > STACK_SIZE {
            return Err(ZErr::StackOverflow);
        }
        self.set_word(self.sp, word);
        self.sp += 2;
        Ok(())
    }

    pub fn pop_word(&mut self) -> Result<u16> {
        if self.sp < self.eval_base() + 2 {
            return Err(ZErr::StackUnderflow);
        }
        self.sp -= 2;
        Ok(self.word_at(self.sp))
    }

    // In-place access for indirect stack references, which do not push or
    // pop.
    pub fn peek_word(&self) -> Result<u16> {
        if self.sp < self.eval_base() + 2 {
            return Err(ZErr::StackUnderflow);
        }
        Ok(self.word_at(self.sp - 2))
    }

    pub fn poke_word(&mut self, word: u16) -> Result<()> {
        if self.sp < self.eval_base() + 2 {
            return Err(ZErr::StackUnderflow);
        }
        self.set_word(self.sp - 2, word);
        Ok(())
    }

    pub fn read_local(&self, l: u8) -> Result<u16> {
        if l >= self.num_locals() {
            return Err(ZErr::NoSuchLocal {
                local: l,
                count: self.num_locals(),
            });
        }
        Ok(self.word_at(self.fp + FRAME_HEADER + 2 * usize::from(l)))
    }

    pub fn write_local(&mut self, l: u8, val: u16) -> Result<()> {
        if l >= self.num_locals() {
            return Err(ZErr::NoSuchLocal {
                local: l,
                count: self.num_locals(),
            });
        }
        self.set_word(self.fp + FRAME_HEADER + 2 * usize::from(l), val);
        Ok(())
    }

    pub fn push_frame(
        &mut self,
        return_pc: usize,
        return_var: Option<ZVariable>,
        locals: &[u16],
    ) -> Result<()> {
        if self.sp + FRAME_HEADER + 2 * locals.len() > STACK_SIZE {
            return Err(ZErr::StackOverflow);
        }

        let caller_fp = self.fp;
        let new_fp = self.sp;
        self.push_word(caller_fp as u16)?;
        self.push_addr(return_pc)?;
        self.push_byte(return_var.map_or(DISCARD_RESULT, u8::from))?;
        self.push_byte(locals.len() as u8)?;
        for local in locals {
            self.push_word(*local)?;
        }

        self.fp = new_fp;
        self.frames += 1;
        Ok(())
    }

    // Unwind one frame, restoring the caller's locals and evaluation
    // stack. Yields the continuation pc and where the result goes.
    pub fn pop_frame(&mut self) -> Result<(usize, Option<ZVariable>)> {
        if self.frames == 0 {
            return Err(ZErr::CallStackUnderflow);
        }

        let prev_fp = self.word_at(self.fp);
        let return_pc = (usize::from(self.word_at(self.fp + 2)) << 16)
            + usize::from(self.word_at(self.fp + 4));
        let return_var = match self.stack[self.fp + 6] {
            DISCARD_RESULT => None,
            byte => Some(ZVariable::from(byte)),
        };

        self.sp = self.fp;
        self.fp = usize::from(prev_fp);
        self.frames -= 1;
        Ok((return_pc, return_var))
    }

    // Raw contents for snapshots.
    pub fn raw(&self) -> (&[u8], usize, usize) {
        (&self.stack[..self.sp], self.fp, self.frames)
    }

    pub fn restore_raw(&mut self, bytes: &[u8], fp: usize, frames: usize) -> Result<()> {
        if bytes.len() > STACK_SIZE || bytes.len() < FRAME_HEADER || fp + FRAME_HEADER > bytes.len()
        {
            return Err(ZErr::MalformedSnapshot("stack contents"));
        }
        self.stack[..bytes.len()].copy_from_slice(bytes);
        self.sp = bytes.len();
        self.fp = fp;
        self.frames = frames;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_eval_push_pop() {
        let mut zs = ZStack::new();
        zs.push_word(0x1234).unwrap();
        zs.push_word(0x5678).unwrap();
        assert_eq!(0x5678, zs.pop_word().unwrap());
        assert_eq!(0x1234, zs.pop_word().unwrap());
        match zs.pop_word() {
            Err(ZErr::StackUnderflow) => (),
            other => panic!("empty pop: {:?}", other),
        }
    }

    #[test]
    fn test_peek_and_poke() {
        let mut zs = ZStack::new();
        zs.push_word(0x1111).unwrap();
        assert_eq!(0x1111, zs.peek_word().unwrap());
        zs.poke_word(0x2222).unwrap();
        assert_eq!(0x2222, zs.pop_word().unwrap());
        assert!(zs.peek_word().is_err());
    }

    #[test]
    fn test_frame_locals() {
        let mut zs = ZStack::new();
        zs.push_frame(0x1234, Some(ZVariable::Stack), &[7, 8, 9])
            .unwrap();

        assert_eq!(7, zs.read_local(0).unwrap());
        assert_eq!(9, zs.read_local(2).unwrap());
        zs.write_local(1, 0xabcd).unwrap();
        assert_eq!(0xabcd, zs.read_local(1).unwrap());

        match zs.read_local(3) {
            Err(ZErr::NoSuchLocal { local: 3, count: 3 }) => (),
            other => panic!("missing local: {:?}", other),
        }
    }

    #[test]
    fn test_frames_isolate_eval_stacks() {
        let mut zs = ZStack::new();
        zs.push_word(0xaaaa).unwrap();

        zs.push_frame(0x0100, None, &[1]).unwrap();
        // The caller's word is below this frame's floor.
        assert!(zs.pop_word().is_err());
        zs.push_word(0xbbbb).unwrap();

        let (return_pc, return_var) = zs.pop_frame().unwrap();
        assert_eq!(0x0100, return_pc);
        assert_eq!(None, return_var);

        // Back in the caller's frame, with its word intact and the
        // callee's leftovers discarded.
        assert_eq!(0xaaaa, zs.pop_word().unwrap());
    }

    #[test]
    fn test_nested_frames() {
        let mut zs = ZStack::new();
        zs.push_frame(0x0100, Some(ZVariable::Local(4)), &[1, 2])
            .unwrap();
        zs.push_frame(0x0200, Some(ZVariable::Global(3)), &[]).unwrap();
        assert_eq!(2, zs.frame_count());

        let (pc2, var2) = zs.pop_frame().unwrap();
        assert_eq!(0x0200, pc2);
        assert_eq!(Some(ZVariable::Global(3)), var2);
        assert_eq!(1, zs.read_local(0).unwrap());

        let (pc1, var1) = zs.pop_frame().unwrap();
        assert_eq!(0x0100, pc1);
        assert_eq!(Some(ZVariable::Local(4)), var1);

        match zs.pop_frame() {
            Err(ZErr::CallStackUnderflow) => (),
            other => panic!("base frame pop: {:?}", other),
        }
    }

    #[test]
    fn test_overflow() {
        let mut zs = ZStack::new();
        loop {
            match zs.push_word(0) {
                Ok(()) => (),
                Err(ZErr::StackOverflow) => break,
                other => panic!("overflow: {:?}", other),
            }
        }
        // A frame cannot be pushed either.
        assert!(zs.push_frame(0, None, &[]).is_err());
    }

    #[test]
    fn test_clear() {
        let mut zs = ZStack::new();
        zs.push_frame(0x0100, None, &[1]).unwrap();
        zs.push_word(5).unwrap();
        zs.clear();
        assert_eq!(0, zs.frame_count());
        assert!(zs.pop_word().is_err());
    }
}
