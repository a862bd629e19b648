use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Structural failures found while reading a module.
///
/// Offsets are absolute positions in the module buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("bad magic number: expected \\0asm")]
    BadMagic,
    #[error("unsupported wasm version: expected 1")]
    BadVersion,
    #[error("section at offset {offset} declares {size} bytes but the module is only {len} bytes")]
    TruncatedSection { offset: usize, size: u32, len: usize },
    #[error("malformed LEB128 integer at offset {offset}")]
    MalformedVarint { offset: usize },
    #[error("unexpected opcode 0x{opcode:02X} at offset {offset}")]
    UnexpectedOpcode { offset: usize, opcode: u8 },
    #[error("first section is not a custom dylink section")]
    MissingDylinkSection,
    #[error("expected custom section `dylink`, found `{name}`")]
    UnexpectedCustomSection { name: String },
    #[error("unknown section id {id} at offset {offset}")]
    UnknownSectionKind { offset: usize, id: u8 },
    #[error("unknown external kind {kind} at offset {offset}")]
    UnknownExternKind { offset: usize, kind: u8 },
    #[error("unknown value type {code} at offset {offset}")]
    UnknownValueType { offset: usize, code: i64 },
    #[error("invalid mutability flag {flag} at offset {offset}")]
    InvalidMutability { offset: usize, flag: u8 },
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
}
