//! Expression tree for the `eval` surface language.

pub mod nodes;

pub use nodes::{BinaryOp, CompareOp, Expr, Literal, UnaryOp};
