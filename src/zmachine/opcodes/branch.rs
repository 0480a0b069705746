use log::trace;

use super::{Result, PC};

// What a resolved branch asks the caller to do next. Offsets 0 and 1 are
// not jumps at all: they mean "return false"/"return true" from the
// current routine, which only the frame owner can perform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BranchResult {
    Continue,
    ReturnFalse,
    ReturnTrue,
}

// Read the branch descriptor from the PC: a polarity bit and either a
// 6-bit unsigned or 14-bit signed offset.
fn read_jump_offset<P>(pc: &mut P) -> Result<(i16, bool)>
where
    P: PC,
{
    let first_byte = pc.next_byte()?;

    let jump_offset = if first_byte & 0b0100_0000 != 0 {
        // One byte only.
        i16::from(first_byte & 0b0011_1111)
    } else {
        let second_byte = pc.next_byte()?;
        let mut offset: u16 = ((u16::from(first_byte) & 0b0011_1111) << 8) + u16::from(second_byte);
        // Check for a negative 14-bit value, and sign extend to 16 bits.
        if offset & 0b0010_0000_0000_0000 != 0 {
            offset |= 0b1100_0000_0000_0000;
        }

        offset as i16
    };

    let branch_on_truth = (first_byte & 0b1000_0000) != 0;

    Ok((jump_offset, branch_on_truth))
}

// All of the branch opcodes share everything but the tested condition.
// Consumes the descriptor, jumps in place when the branch is taken, and
// reports the two return special cases to the caller.
pub fn branch_on<P>(pc: &mut P, truth: bool) -> Result<BranchResult>
where
    P: PC,
{
    let (offset, branch_on_truth) = read_jump_offset(pc)?;
    trace!(
        "branch ?{}({:+}) given {}",
        if branch_on_truth { "" } else { "~" },
        offset,
        truth
    );

    if branch_on_truth != truth {
        return Ok(BranchResult::Continue);
    }

    match offset {
        0 => Ok(BranchResult::ReturnFalse),
        1 => Ok(BranchResult::ReturnTrue),
        o => {
            // The offset is measured from the byte after the descriptor,
            // minus the 2 the format reserves for the two return codes.
            pc.offset_pc(isize::from(o) - 2);
            Ok(BranchResult::Continue)
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::super::fixtures::TestPC;
    use super::*;

    #[test]
    fn test_jump_offset() {
        let mut pc = TestPC::new(0, vec![0b0100_1111, 0]);
        assert_eq!((15, false), read_jump_offset(&mut pc).unwrap());

        let mut pc = TestPC::new(0, vec![0b1100_1111, 0]);
        assert_eq!((15, true), read_jump_offset(&mut pc).unwrap());

        let mut pc = TestPC::new(0, vec![0b0001_1000, 0b0000_1111]);
        assert_eq!(
            (0b0001_1000_0000_1111, false),
            read_jump_offset(&mut pc).unwrap()
        );

        let mut pc = TestPC::new(0, vec![0b0011_1111, 0b1111_1111]);
        assert_eq!((-1, false), read_jump_offset(&mut pc).unwrap());

        let mut pc = TestPC::new(0, vec![0b1011_1111, 0b1111_0100]);
        assert_eq!((-12, true), read_jump_offset(&mut pc).unwrap());
    }

    #[test]
    fn test_branch_taken_and_not() {
        let mut pc = TestPC::new(0, vec![0b1100_0110, 0, 0, 0, 0, 0]);
        assert_eq!(BranchResult::Continue, branch_on(&mut pc, true).unwrap());
        assert_eq!(5, pc.current_pc());

        let mut pc = TestPC::new(0, vec![0b0100_0110, 0, 0, 0, 0, 0]);
        assert_eq!(BranchResult::Continue, branch_on(&mut pc, true).unwrap());
        assert_eq!(1, pc.current_pc());

        let mut pc = TestPC::new(0, vec![0b1100_0110, 0, 0, 0, 0, 0]);
        assert_eq!(BranchResult::Continue, branch_on(&mut pc, false).unwrap());
        assert_eq!(1, pc.current_pc());

        let mut pc = TestPC::new(0, vec![0b0100_0110, 0, 0, 0, 0, 0]);
        assert_eq!(BranchResult::Continue, branch_on(&mut pc, false).unwrap());
        assert_eq!(5, pc.current_pc());
    }

    #[test]
    fn test_branch_backward() {
        let mut pc = TestPC::new(30, vec![0b1011_1111, 0b1111_0100, 0, 0]);
        assert_eq!(BranchResult::Continue, branch_on(&mut pc, true).unwrap());
        // Descriptor ends at 32; -12 - 2 from there.
        assert_eq!(18, pc.current_pc());
    }

    #[test]
    fn test_return_special_cases() {
        // Offset 0: return false, only when the branch is taken.
        let mut pc = TestPC::new(0, vec![0b1100_0000, 0, 0]);
        assert_eq!(BranchResult::ReturnFalse, branch_on(&mut pc, true).unwrap());

        let mut pc = TestPC::new(0, vec![0b1100_0000, 0, 0]);
        assert_eq!(BranchResult::Continue, branch_on(&mut pc, false).unwrap());

        // Offset 1: return true.
        let mut pc = TestPC::new(0, vec![0b1100_0001, 0, 0]);
        assert_eq!(BranchResult::ReturnTrue, branch_on(&mut pc, true).unwrap());

        // Polarity inverted: the branch fires on a false condition.
        let mut pc = TestPC::new(0, vec![0b0100_0001, 0, 0]);
        assert_eq!(BranchResult::ReturnTrue, branch_on(&mut pc, false).unwrap());
    }
}
