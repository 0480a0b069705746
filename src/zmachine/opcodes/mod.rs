mod branch;
mod zoperand;
mod zvariable;

use super::result::{Result, ZErr};
use super::traits::{Variables, PC};

pub use self::branch::{branch_on, BranchResult};
pub use self::zoperand::{ZOperand, ZOperandType};
pub use self::zvariable::ZVariable;
