pub mod error;
pub mod grammar;

pub use error::ParseError;
pub use grammar::parse;
