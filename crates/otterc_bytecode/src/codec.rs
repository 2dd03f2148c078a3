//! Wire format shared by the `otterc` compiler and the eval fallback tier.
//!
//! Layout: `OTBC` magic, little-endian `u16` format version, then the bincode
//! body of a [`Program`]. Decoding validates the program before handing it out.

use bincode::Options;
use thiserror::Error;

use crate::program::{Program, ValidationError};

pub const MAGIC: [u8; 4] = *b"OTBC";
pub const FORMAT_VERSION: u16 = 1;
/// Upper bound on an encoded program, header included.
pub const MAX_PROGRAM_BYTES: usize = 1024 * 1024;

const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialise program: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("encoded program is {0} bytes, above the 1 MiB ceiling")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("input of {0} bytes is too short for a program header")]
    Truncated(usize),
    #[error("bad magic {0:02x?}, expected OTBC")]
    BadMagic([u8; 4]),
    #[error("unsupported bytecode format version {0}")]
    UnsupportedVersion(u16),
    #[error("malformed program body: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("invalid program: {0}")]
    Invalid(#[from] ValidationError),
}

fn body_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PROGRAM_BYTES as u64)
        .reject_trailing_bytes()
}

pub fn encode(program: &Program) -> Result<Vec<u8>, EncodeError> {
    let body = body_options().serialize(program)?;
    let total = HEADER_LEN + body.len();
    if total > MAX_PROGRAM_BYTES {
        return Err(EncodeError::TooLarge(total));
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Program, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }

    let (header, body) = bytes.split_at(HEADER_LEN);
    let magic = [header[0], header[1], header[2], header[3]];
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let program: Program = body_options().deserialize(body)?;
    program.validate()?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Constant, Instruction};

    fn sample() -> Program {
        Program::new(
            vec![Constant::Int(6), Constant::Str("x".into())],
            vec![Instruction::LoadConst(0), Instruction::Return],
            1,
        )
    }

    #[test]
    fn header_is_magic_then_version() {
        let bytes = encode(&sample()).expect("encode");
        assert_eq!(&bytes[..4], b"OTBC");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);
        assert_eq!(decode(&bytes).expect("decode"), sample());
    }

    #[test]
    fn rejects_foreign_or_truncated_input() {
        assert!(matches!(decode(b"OTB"), Err(DecodeError::Truncated(3))));
        assert!(matches!(
            decode(b"ELF\x7f\x01\x00rest"),
            Err(DecodeError::BadMagic(_))
        ));

        let mut bytes = encode(&sample()).expect("encode");
        bytes[4] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_trailing_garbage_and_cut_bodies() {
        let mut bytes = encode(&sample()).expect("encode");
        bytes.push(0xff);
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));

        let bytes = encode(&sample()).expect("encode");
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_structurally_invalid_programs() {
        let broken = Program::new(vec![], vec![Instruction::Add, Instruction::Return], 0);
        let bytes = encode(&broken).expect("encode");
        assert!(matches!(decode(&bytes), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn rejects_inflated_stack_declaration() {
        let inflated = Program::new(
            vec![Constant::Int(1)],
            vec![Instruction::LoadConst(0), Instruction::Return],
            u32::MAX,
        );
        let bytes = encode(&inflated).expect("encode");
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::Invalid(ValidationError::StackTooLarge { .. }))
        ));
    }
}
