use std::mem::size_of;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compile-time constant referenced by [`Instruction::LoadConst`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    LoadConst(u32),
    Neg,
    Pos,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Return,
}

impl Instruction {
    /// Net effect on the operand stack and the depth it needs beforehand.
    fn stack_effect(self) -> (usize, isize) {
        match self {
            Self::LoadConst(_) => (0, 1),
            Self::Neg | Self::Pos | Self::Not => (1, 0),
            Self::Return => (1, -1),
            _ => (2, -1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("program has no instructions")]
    EmptyCode,
    #[error("constant index {index} out of range at pc {pc}")]
    ConstantOutOfRange { pc: usize, index: u32 },
    #[error("stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },
    #[error("instruction after return at pc {pc}")]
    CodeAfterReturn { pc: usize },
    #[error("program does not end with return")]
    MissingReturn,
    #[error("return leaves {depth} values on the stack")]
    StackImbalance { depth: usize },
    #[error("program needs {needed} stack slots but declares {declared}")]
    StackTooSmall { needed: u32, declared: u32 },
    #[error("program declares {declared} stack slots for {len} instructions")]
    StackTooLarge { declared: u32, len: usize },
}

/// An executable listing: constant pool plus straight-line code ending in `Return`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub constants: Vec<Constant>,
    pub code: Vec<Instruction>,
    pub max_stack: u32,
}

impl Program {
    pub fn new(constants: Vec<Constant>, code: Vec<Instruction>, max_stack: u32) -> Self {
        Self {
            constants,
            code,
            max_stack,
        }
    }

    /// Estimated heap plus inline footprint in bytes.
    pub fn byte_size(&self) -> usize {
        let strings: usize = self
            .constants
            .iter()
            .map(|constant| match constant {
                Constant::Str(s) => s.len(),
                _ => 0,
            })
            .sum();

        size_of::<Self>()
            + self.constants.len() * size_of::<Constant>()
            + strings
            + self.code.len() * size_of::<Instruction>()
    }

    /// Check constant references and stack discipline. Returns the deepest stack use.
    pub fn validate(&self) -> Result<u32, ValidationError> {
        if self.code.is_empty() {
            return Err(ValidationError::EmptyCode);
        }
        // Each instruction pushes at most one value.
        if self.max_stack as usize > self.code.len() {
            return Err(ValidationError::StackTooLarge {
                declared: self.max_stack,
                len: self.code.len(),
            });
        }

        let mut depth = 0usize;
        let mut deepest = 0usize;
        let mut returned = false;

        for (pc, instruction) in self.code.iter().enumerate() {
            if returned {
                return Err(ValidationError::CodeAfterReturn { pc });
            }

            if let Instruction::LoadConst(index) = instruction {
                if *index as usize >= self.constants.len() {
                    return Err(ValidationError::ConstantOutOfRange { pc, index: *index });
                }
            }

            let (needs, effect) = instruction.stack_effect();
            if depth < needs {
                return Err(ValidationError::StackUnderflow { pc });
            }
            depth = depth.saturating_add_signed(effect);
            deepest = deepest.max(depth);

            if *instruction == Instruction::Return {
                if depth != 0 {
                    return Err(ValidationError::StackImbalance { depth: depth + 1 });
                }
                returned = true;
            }
        }

        if !returned {
            return Err(ValidationError::MissingReturn);
        }

        let needed = u32::try_from(deepest).unwrap_or(u32::MAX);
        if needed > self.max_stack {
            return Err(ValidationError::StackTooSmall {
                needed,
                declared: self.max_stack,
            });
        }
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(code: Vec<Instruction>) -> Program {
        Program::new(vec![Constant::Int(1), Constant::Int(2)], code, 2)
    }

    #[test]
    fn well_formed_program_reports_depth() {
        let p = program(vec![
            Instruction::LoadConst(0),
            Instruction::LoadConst(1),
            Instruction::Add,
            Instruction::Return,
        ]);
        assert_eq!(p.validate(), Ok(2));
    }

    #[test]
    fn detects_underflow_and_missing_return() {
        let underflow = program(vec![Instruction::LoadConst(0), Instruction::Add]);
        assert_eq!(
            underflow.validate(),
            Err(ValidationError::StackUnderflow { pc: 1 })
        );

        let no_return = program(vec![Instruction::LoadConst(0)]);
        assert_eq!(no_return.validate(), Err(ValidationError::MissingReturn));
    }

    #[test]
    fn detects_bad_constant_and_trailing_code() {
        let bad_const = program(vec![Instruction::LoadConst(9), Instruction::Return]);
        assert!(matches!(
            bad_const.validate(),
            Err(ValidationError::ConstantOutOfRange { index: 9, .. })
        ));

        let trailing = program(vec![
            Instruction::LoadConst(0),
            Instruction::Return,
            Instruction::LoadConst(0),
        ]);
        assert_eq!(
            trailing.validate(),
            Err(ValidationError::CodeAfterReturn { pc: 2 })
        );
    }

    #[test]
    fn rejects_declared_stack_beyond_code_length() {
        let oversized = Program::new(
            vec![Constant::Int(1)],
            vec![Instruction::LoadConst(0), Instruction::Return],
            u32::MAX,
        );
        assert_eq!(
            oversized.validate(),
            Err(ValidationError::StackTooLarge {
                declared: u32::MAX,
                len: 2
            })
        );

        let slack = Program::new(
            vec![Constant::Int(1)],
            vec![Instruction::LoadConst(0), Instruction::Return],
            2,
        );
        assert_eq!(slack.validate(), Ok(1));
    }

    #[test]
    fn byte_size_grows_with_string_constants() {
        let small = Program::new(vec![Constant::Str("a".into())], vec![Instruction::Return], 1);
        let large = Program::new(
            vec![Constant::Str("a".repeat(4096))],
            vec![Instruction::Return],
            1,
        );
        assert!(large.byte_size() >= small.byte_size() + 4095);
    }
}
