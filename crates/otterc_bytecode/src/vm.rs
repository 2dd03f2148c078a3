use std::cmp::Ordering;
use std::sync::Arc;

use thiserror::Error;

use crate::program::{Instruction, Program};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },
    #[error("constant index {index} out of range at pc {pc}")]
    InvalidConstant { pc: usize, index: u32 },
    #[error("unsupported operand type(s) for {op}: '{left}' and '{right}'")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("bad operand type for unary {op}: '{operand}'")]
    BadOperand {
        op: &'static str,
        operand: &'static str,
    },
    #[error("{0}")]
    ZeroDivision(&'static str),
    #[error("integer overflow in {op}")]
    IntegerOverflow { op: &'static str },
    #[error("program finished without returning a value")]
    MissingReturn,
    #[error("string result of {len} bytes exceeds the 16 MiB limit")]
    StringTooLarge { len: usize },
}

/// Largest string a program may build through repetition or concatenation.
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

/// Stack machine that executes one [`Program`] at a time.
///
/// The operand stack is owned by the VM and dropped with it.
#[derive(Debug, Default)]
pub struct Vm {
    stack: Vec<Value>,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&mut self, program: &Program) -> Result<Value, VmError> {
        self.stack.clear();
        // `max_stack` may come from an unvalidated program.
        let reserve = (program.max_stack as usize).min(program.code.len());
        self.stack.reserve(reserve);

        for (pc, instruction) in program.code.iter().enumerate() {
            match *instruction {
                Instruction::LoadConst(index) => {
                    let constant = program
                        .constants
                        .get(index as usize)
                        .ok_or(VmError::InvalidConstant { pc, index })?;
                    self.stack.push(Value::from(constant));
                }
                Instruction::Neg => {
                    let operand = self.pop(pc)?;
                    self.stack.push(negate(operand)?);
                }
                Instruction::Pos => {
                    let operand = self.pop(pc)?;
                    self.stack.push(positive(operand)?);
                }
                Instruction::Not => {
                    let operand = self.pop(pc)?;
                    self.stack.push(Value::Bool(!operand.is_truthy()));
                }
                Instruction::Return => {
                    let result = self.pop(pc)?;
                    self.stack.clear();
                    return Ok(result);
                }
                binary => {
                    let right = self.pop(pc)?;
                    let left = self.pop(pc)?;
                    self.stack.push(binary_op(binary, left, right)?);
                }
            }
        }

        self.stack.clear();
        Err(VmError::MissingReturn)
    }

    fn pop(&mut self, pc: usize) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { pc })
    }
}

fn negate(operand: Value) -> Result<Value, VmError> {
    match operand {
        Value::Float(f) => Ok(Value::Float(-f)),
        other => match other.as_int() {
            Some(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or(VmError::IntegerOverflow { op: "-" }),
            None => Err(VmError::BadOperand {
                op: "-",
                operand: other.type_name(),
            }),
        },
    }
}

fn positive(operand: Value) -> Result<Value, VmError> {
    match operand {
        Value::Float(_) | Value::Int(_) => Ok(operand),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        other => Err(VmError::BadOperand {
            op: "+",
            operand: other.type_name(),
        }),
    }
}

fn symbol(instruction: Instruction) -> &'static str {
    match instruction {
        Instruction::Add => "+",
        Instruction::Sub => "-",
        Instruction::Mul => "*",
        Instruction::Div => "/",
        Instruction::FloorDiv => "//",
        Instruction::Mod => "%",
        Instruction::Pow => "** or pow()",
        Instruction::Eq => "==",
        Instruction::Ne => "!=",
        Instruction::Lt => "<",
        Instruction::Le => "<=",
        Instruction::Gt => ">",
        Instruction::Ge => ">=",
        Instruction::LoadConst(_) | Instruction::Neg | Instruction::Pos | Instruction::Not => "?",
        Instruction::Return => "return",
    }
}

fn mismatch(instruction: Instruction, left: &Value, right: &Value) -> VmError {
    VmError::TypeMismatch {
        op: symbol(instruction),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn binary_op(instruction: Instruction, left: Value, right: Value) -> Result<Value, VmError> {
    match instruction {
        Instruction::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        Instruction::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        Instruction::Lt | Instruction::Le | Instruction::Gt | Instruction::Ge => {
            let ordering =
                compare(&left, &right).ok_or_else(|| mismatch(instruction, &left, &right))?;
            Ok(Value::Bool(match instruction {
                Instruction::Lt => ordering == Some(Ordering::Less),
                Instruction::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                Instruction::Gt => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }))
        }
        Instruction::Add => match (&left, &right) {
            (Value::Str(a), Value::Str(b)) => {
                check_string_len(a.len().saturating_add(b.len()))?;
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Ok(Value::Str(Arc::from(joined)))
            }
            _ => arithmetic(instruction, &left, &right, i64::checked_add, |a, b| a + b),
        },
        Instruction::Sub => arithmetic(instruction, &left, &right, i64::checked_sub, |a, b| a - b),
        Instruction::Mul => match (&left, &right) {
            (Value::Str(s), count) | (count, Value::Str(s)) if count.as_int().is_some() => {
                let times = usize::try_from(count.as_int().unwrap_or(0)).unwrap_or(0);
                check_string_len(s.len().saturating_mul(times))?;
                Ok(Value::Str(Arc::from(s.repeat(times))))
            }
            _ => arithmetic(instruction, &left, &right, i64::checked_mul, |a, b| a * b),
        },
        Instruction::Div => {
            let (a, b) = float_pair(instruction, &left, &right)?;
            if b == 0.0 {
                return Err(VmError::ZeroDivision("division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        Instruction::FloorDiv => {
            if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
                return floor_div_int(a, b).map(Value::Int);
            }
            let (a, b) = float_pair(instruction, &left, &right)?;
            if b == 0.0 {
                return Err(VmError::ZeroDivision("float floor division by zero"));
            }
            Ok(Value::Float((a / b).floor()))
        }
        Instruction::Mod => {
            if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
                return mod_int(a, b).map(Value::Int);
            }
            let (a, b) = float_pair(instruction, &left, &right)?;
            if b == 0.0 {
                return Err(VmError::ZeroDivision("float modulo"));
            }
            let mut r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r += b;
            }
            Ok(Value::Float(r))
        }
        Instruction::Pow => power(instruction, &left, &right),
        other => Err(mismatch(other, &left, &right)),
    }
}

fn arithmetic(
    instruction: Instruction,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, VmError> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return int_op(a, b)
            .map(Value::Int)
            .ok_or(VmError::IntegerOverflow {
                op: symbol(instruction),
            });
    }
    let (a, b) = float_pair(instruction, left, right)?;
    Ok(Value::Float(float_op(a, b)))
}

fn check_string_len(len: usize) -> Result<(), VmError> {
    if len > MAX_STRING_BYTES {
        return Err(VmError::StringTooLarge { len });
    }
    Ok(())
}

fn float_pair(
    instruction: Instruction,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), VmError> {
    match (left.as_float(), right.as_float()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(mismatch(instruction, left, right)),
    }
}

fn floor_div_int(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        return Err(VmError::ZeroDivision("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or(VmError::IntegerOverflow { op: "//" })?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn mod_int(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        return Err(VmError::ZeroDivision("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn power(instruction: Instruction, left: &Value, right: &Value) -> Result<Value, VmError> {
    if let (Some(base), Some(exp)) = (left.as_int(), right.as_int()) {
        if exp >= 0 {
            let exp = u32::try_from(exp).map_err(|_| VmError::IntegerOverflow { op: "**" })?;
            return base
                .checked_pow(exp)
                .map(Value::Int)
                .ok_or(VmError::IntegerOverflow { op: "**" });
        }
        if base == 0 {
            return Err(VmError::ZeroDivision(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let (a, b) = float_pair(instruction, left, right)?;
    if a == 0.0 && b < 0.0 {
        return Err(VmError::ZeroDivision(
            "0.0 cannot be raised to a negative power",
        ));
    }
    Ok(Value::Float(a.powf(b)))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Str(_), _) | (_, Value::Str(_)) | (Value::None, _) | (_, Value::None) => false,
        _ => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => a == b,
            _ => left.as_float() == right.as_float(),
        },
    }
}

/// `None` when the pair is not orderable; `Some(None)` for NaN comparisons.
fn compare(left: &Value, right: &Value) -> Option<Option<Ordering>> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(Some(a.cmp(b))),
        (Value::Str(_), _) | (_, Value::Str(_)) | (Value::None, _) | (_, Value::None) => None,
        _ => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => Some(Some(a.cmp(&b))),
            _ => {
                let (a, b) = (left.as_float()?, right.as_float()?);
                Some(a.partial_cmp(&b))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::program::Constant;
    use otterc_ast::{BinaryOp, CompareOp, Expr, UnaryOp};

    fn eval(expr: Expr) -> Result<Value, VmError> {
        Vm::new().run(&compile(&expr))
    }

    fn bin(l: Expr, op: BinaryOp, r: Expr) -> Expr {
        Expr::binary(l, op, r)
    }

    #[test]
    fn integer_arithmetic() {
        let expr = bin(
            Expr::int(1),
            BinaryOp::Add,
            bin(Expr::int(2), BinaryOp::Mul, Expr::int(3)),
        );
        assert_eq!(eval(expr), Ok(Value::Int(7)));
    }

    #[test]
    fn true_division_yields_float() {
        assert_eq!(
            eval(bin(Expr::int(7), BinaryOp::Div, Expr::int(2))),
            Ok(Value::Float(3.5))
        );
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        assert_eq!(
            eval(bin(Expr::int(-7), BinaryOp::FloorDiv, Expr::int(2))),
            Ok(Value::Int(-4))
        );
        assert_eq!(
            eval(bin(Expr::int(-7), BinaryOp::Mod, Expr::int(3))),
            Ok(Value::Int(2))
        );
        assert_eq!(
            eval(bin(Expr::int(7), BinaryOp::Mod, Expr::int(-3))),
            Ok(Value::Int(-2))
        );
    }

    #[test]
    fn division_by_zero_is_reported() {
        assert!(matches!(
            eval(bin(Expr::int(1), BinaryOp::Div, Expr::int(0))),
            Err(VmError::ZeroDivision(_))
        ));
        assert!(matches!(
            eval(bin(Expr::int(1), BinaryOp::Mod, Expr::int(0))),
            Err(VmError::ZeroDivision(_))
        ));
    }

    #[test]
    fn power_overflow_and_negative_exponent() {
        assert_eq!(
            eval(bin(Expr::int(2), BinaryOp::Pow, Expr::int(10))),
            Ok(Value::Int(1024))
        );
        assert_eq!(
            eval(bin(Expr::int(2), BinaryOp::Pow, Expr::int(-1))),
            Ok(Value::Float(0.5))
        );
        assert_eq!(
            eval(bin(Expr::int(2), BinaryOp::Pow, Expr::int(200))),
            Err(VmError::IntegerOverflow { op: "**" })
        );
    }

    #[test]
    fn string_concatenation_and_repetition() {
        assert_eq!(
            eval(bin(Expr::string("ab"), BinaryOp::Add, Expr::string("cd"))),
            Ok(Value::Str("abcd".into()))
        );
        assert_eq!(
            eval(bin(Expr::string("ab"), BinaryOp::Mul, Expr::int(3))),
            Ok(Value::Str("ababab".into()))
        );
    }

    #[test]
    fn runaway_repetition_is_capped() {
        assert!(matches!(
            eval(bin(Expr::string("ab"), BinaryOp::Mul, Expr::int(1 << 40))),
            Err(VmError::StringTooLarge { .. })
        ));
    }

    #[test]
    fn mixed_types_are_rejected() {
        assert_eq!(
            eval(bin(Expr::string("a"), BinaryOp::Add, Expr::int(1))),
            Err(VmError::TypeMismatch {
                op: "+",
                left: "str",
                right: "int",
            })
        );
        assert!(matches!(
            eval(Expr::unary(UnaryOp::Neg, Expr::string("a"))),
            Err(VmError::BadOperand { .. })
        ));
    }

    #[test]
    fn comparisons_mix_numeric_types() {
        assert_eq!(
            eval(Expr::compare(Expr::int(1), CompareOp::Eq, Expr::float(1.0))),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            eval(Expr::compare(Expr::none(), CompareOp::Eq, Expr::int(0))),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            eval(Expr::compare(Expr::string("a"), CompareOp::Lt, Expr::string("b"))),
            Ok(Value::Bool(true))
        );
        assert!(eval(Expr::compare(Expr::none(), CompareOp::Lt, Expr::int(1))).is_err());
    }

    #[test]
    fn not_uses_truthiness() {
        assert_eq!(
            eval(Expr::unary(UnaryOp::Not, Expr::string(""))),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn oversized_stack_declaration_does_not_preallocate() {
        let program = Program::new(
            vec![Constant::Int(1)],
            vec![Instruction::LoadConst(0), Instruction::Return],
            u32::MAX,
        );
        assert_eq!(Vm::new().run(&program), Ok(Value::Int(1)));
    }

    #[test]
    fn missing_return_is_an_error() {
        let program = Program::new(vec![], vec![], 0);
        assert_eq!(Vm::new().run(&program), Err(VmError::MissingReturn));
    }
}
