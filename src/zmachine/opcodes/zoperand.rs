use std::fmt;

use super::{Result, Variables, ZErr, ZVariable, PC};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ZOperandType {
    LargeConstantType,
    SmallConstantType,
    VariableType,
    OmittedType,
}

impl From<u8> for ZOperandType {
    // from must never fail, so it ignores the top bits.
    fn from(byte: u8) -> ZOperandType {
        match byte & 0b11 {
            0b00 => ZOperandType::LargeConstantType,
            0b01 => ZOperandType::SmallConstantType,
            0b10 => ZOperandType::VariableType,
            0b11 => ZOperandType::OmittedType,
            _ => unreachable!(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ZOperand {
    LargeConstant(u16),
    SmallConstant(u8),
    Var(ZVariable),
    Omitted,
}

impl ZOperand {
    pub fn read_operand<P>(pc: &mut P, otype: ZOperandType) -> Result<ZOperand>
    where
        P: PC,
    {
        match otype {
            ZOperandType::LargeConstantType => {
                let lc = pc.next_word()?;
                Ok(ZOperand::LargeConstant(lc))
            }
            ZOperandType::SmallConstantType => {
                let sc = pc.next_byte()?;
                Ok(ZOperand::SmallConstant(sc))
            }
            ZOperandType::VariableType => {
                let var = pc.next_byte()?;
                Ok(ZOperand::Var(var.into()))
            }
            ZOperandType::OmittedType => Ok(ZOperand::Omitted),
        }
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self, ZOperand::Omitted)
    }

    // Resolve to a value. Reading a Var(Stack) operand pops.
    pub fn value<V>(&self, variables: &V, pc: usize) -> Result<u16>
    where
        V: Variables,
    {
        match *self {
            ZOperand::LargeConstant(val) => Ok(val),
            ZOperand::SmallConstant(val) => Ok(u16::from(val)),
            ZOperand::Var(var) => variables.read_variable(var),
            ZOperand::Omitted => Err(ZErr::MissingOperand { pc }),
        }
    }

    pub fn signed_value<V>(&self, variables: &V, pc: usize) -> Result<i16>
    where
        V: Variables,
    {
        Ok(self.value(variables, pc)? as i16)
    }
}

impl Default for ZOperand {
    fn default() -> ZOperand {
        ZOperand::Omitted
    }
}

impl fmt::Display for ZOperand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ZOperand::*;
        match *self {
            LargeConstant(c) => write!(f, "#{:04x}", c),
            SmallConstant(c) => write!(f, "#{:02x}", c),
            Var(v) => write!(f, "{}", v),
            Omitted => write!(f, "_"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::super::fixtures::{TestPC, TestVariables};
    use super::super::super::traits::Variables;
    use super::*;

    #[test]
    fn test_read_operand() {
        let mut pc = TestPC::new(0, vec![0x12, 0x34, 0x56, 0x20]);

        match ZOperand::read_operand(&mut pc, ZOperandType::LargeConstantType).unwrap() {
            ZOperand::LargeConstant(0x1234) => (),
            o => panic!("large constant: {}", o),
        }
        match ZOperand::read_operand(&mut pc, ZOperandType::SmallConstantType).unwrap() {
            ZOperand::SmallConstant(0x56) => (),
            o => panic!("small constant: {}", o),
        }
        match ZOperand::read_operand(&mut pc, ZOperandType::VariableType).unwrap() {
            ZOperand::Var(ZVariable::Global(0x10)) => (),
            o => panic!("variable: {}", o),
        }
        assert!(ZOperand::read_operand(&mut pc, ZOperandType::OmittedType)
            .unwrap()
            .is_omitted());
    }

    #[test]
    fn test_value() {
        let mut variables = TestVariables::new();
        variables
            .write_variable(ZVariable::Local(2), 0xbeef)
            .unwrap();

        assert_eq!(
            0x1234,
            ZOperand::LargeConstant(0x1234)
                .value(&variables, 0)
                .unwrap()
        );
        assert_eq!(
            0xbeef,
            ZOperand::Var(ZVariable::Local(2))
                .value(&variables, 0)
                .unwrap()
        );
        assert_eq!(
            -2,
            ZOperand::LargeConstant(0xfffe)
                .signed_value(&variables, 0)
                .unwrap()
        );
        assert!(ZOperand::Omitted.value(&variables, 0).is_err());
    }
}
