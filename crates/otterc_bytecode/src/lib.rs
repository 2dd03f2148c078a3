//! Bytecode programs for the eval subsystem.
//!
//! A [`Program`] is a flat stack-machine listing produced from an expression tree
//! by [`compile`]. Programs cross the process boundary through [`encode`] and
//! [`decode`], and run on a [`Vm`] to produce a single [`Value`].

pub mod codec;
pub mod compile;
pub mod program;
pub mod value;
pub mod vm;

pub use codec::{DecodeError, EncodeError, FORMAT_VERSION, MAGIC, MAX_PROGRAM_BYTES, decode, encode};
pub use compile::compile;
pub use program::{Constant, Instruction, Program, ValidationError};
pub use value::Value;
pub use vm::{MAX_STRING_BYTES, Vm, VmError};
