use otterc_ast::{BinaryOp, CompareOp, Expr, Literal, UnaryOp};

use crate::program::{Constant, Instruction, Program};

/// Lower an expression tree into a program that leaves its value on the stack
/// and returns it.
pub fn compile(expr: &Expr) -> Program {
    let mut builder = ProgramBuilder::default();
    builder.emit_expr(expr);
    builder.finish()
}

#[derive(Default)]
struct ProgramBuilder {
    constants: Vec<Constant>,
    code: Vec<Instruction>,
    depth: u32,
    max_depth: u32,
}

impl ProgramBuilder {
    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(literal) => {
                let index = self.constant(literal_constant(literal));
                self.push(Instruction::LoadConst(index));
            }
            Expr::Unary { op, expr } => {
                self.emit_expr(expr);
                self.push(match op {
                    UnaryOp::Neg => Instruction::Neg,
                    UnaryOp::Pos => Instruction::Pos,
                    UnaryOp::Not => Instruction::Not,
                });
            }
            Expr::Binary { left, op, right } => {
                self.emit_expr(left);
                self.emit_expr(right);
                self.push(binary_instruction(*op));
            }
            Expr::Compare { left, op, right } => {
                self.emit_expr(left);
                self.emit_expr(right);
                self.push(compare_instruction(*op));
            }
        }
    }

    fn constant(&mut self, constant: Constant) -> u32 {
        let index = match self.constants.iter().position(|c| *c == constant) {
            Some(existing) => existing,
            None => {
                self.constants.push(constant);
                self.constants.len() - 1
            }
        };
        u32::try_from(index).unwrap_or(u32::MAX)
    }

    fn push(&mut self, instruction: Instruction) {
        match instruction {
            Instruction::LoadConst(_) => {
                self.depth += 1;
                self.max_depth = self.max_depth.max(self.depth);
            }
            Instruction::Neg | Instruction::Pos | Instruction::Not => {}
            _ => self.depth = self.depth.saturating_sub(1),
        }
        self.code.push(instruction);
    }

    fn finish(mut self) -> Program {
        self.push(Instruction::Return);
        Program::new(self.constants, self.code, self.max_depth)
    }
}

fn literal_constant(literal: &Literal) -> Constant {
    match literal {
        Literal::None => Constant::None,
        Literal::Bool(b) => Constant::Bool(*b),
        Literal::Int(i) => Constant::Int(*i),
        Literal::Float(f) => Constant::Float(*f),
        Literal::Str(s) => Constant::Str(s.clone()),
    }
}

fn binary_instruction(op: BinaryOp) -> Instruction {
    match op {
        BinaryOp::Add => Instruction::Add,
        BinaryOp::Sub => Instruction::Sub,
        BinaryOp::Mul => Instruction::Mul,
        BinaryOp::Div => Instruction::Div,
        BinaryOp::FloorDiv => Instruction::FloorDiv,
        BinaryOp::Mod => Instruction::Mod,
        BinaryOp::Pow => Instruction::Pow,
    }
}

fn compare_instruction(op: CompareOp) -> Instruction {
    match op {
        CompareOp::Eq => Instruction::Eq,
        CompareOp::Ne => Instruction::Ne,
        CompareOp::Lt => Instruction::Lt,
        CompareOp::Le => Instruction::Le,
        CompareOp::Gt => Instruction::Gt,
        CompareOp::Ge => Instruction::Ge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_in_postfix_order() {
        let expr = Expr::binary(
            Expr::int(1),
            BinaryOp::Add,
            Expr::binary(Expr::int(2), BinaryOp::Mul, Expr::int(3)),
        );
        let program = compile(&expr);
        assert_eq!(
            program.code,
            vec![
                Instruction::LoadConst(0),
                Instruction::LoadConst(1),
                Instruction::LoadConst(2),
                Instruction::Mul,
                Instruction::Add,
                Instruction::Return,
            ]
        );
        assert_eq!(program.max_stack, 3);
        assert_eq!(program.validate(), Ok(3));
    }

    #[test]
    fn repeated_literals_share_a_constant() {
        let expr = Expr::binary(Expr::string("ab"), BinaryOp::Add, Expr::string("ab"));
        let program = compile(&expr);
        assert_eq!(program.constants, vec![Constant::Str("ab".into())]);
    }
}
