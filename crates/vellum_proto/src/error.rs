//! Typed protocol errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("message too short: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("unsupported protocol version {major}.{minor}")]
    BadVersion { major: u8, minor: u8 },

    #[error("request id {0} outside [1, 2^31-1]")]
    BadRequestId(i32),

    #[error("invalid delimiter tag 0x{0:02x}")]
    BadGroupTag(u8),

    #[error("invalid value tag 0x{0:02x}")]
    BadValueTag(u8),

    #[error("attribute value before any delimiter tag")]
    ValueOutsideGroup,

    #[error("1setOf value without a preceding named attribute")]
    OrphanValue,

    #[error("attribute name length {0} exceeds the wire limit")]
    NameTooLong(usize),

    #[error("value length {got} exceeds limit {max} for tag 0x{tag:02x}")]
    ValueTooLong { tag: u8, got: usize, max: usize },

    #[error("wrong value length {got} for tag 0x{tag:02x}")]
    BadValueLength { tag: u8, got: usize },

    #[error("member attribute outside a collection")]
    MemberOutsideCollection,

    #[error("collection not terminated before end of attributes")]
    UnterminatedCollection,

    #[error("attribute {name:?} failed validation: {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("invalid destination uri {uri:?}: {reason}")]
    BadDestUri { uri: String, reason: String },

    #[error("invalid destination name {0:?}")]
    BadDestName(String),

    #[error("non-utf8 text in {0:?}")]
    BadUtf8(String),
}
