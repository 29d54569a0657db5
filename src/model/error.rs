use alloc::string::String;

use thiserror::Error;

use crate::model::address::{MemoryAddress, SpaceId};

/// Failures reported by a [`Transport`](crate::model::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote controller did not answer in time.
    #[error("transport timed out")]
    Timeout,
    /// The link reported an error or returned a malformed response.
    #[error("communication failure: {0}")]
    Communication(String),
    /// A page read returned an unexpected number of bytes.
    #[error("short page read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}

/// Errors that can occur while mapping records onto remote memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The transport failed; the page cache has been invalidated.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The shadow checksum of a field does not match and no default was declared.
    #[error("field `{field}` fails its checksum")]
    InvalidChecksum { field: String },

    /// The requested id is outside the valid range of the record type.
    #[error("could not find {record}({id}): {detail}")]
    DoesNotExist {
        record: String,
        id: u32,
        detail: String,
    },

    /// The record type has an id, but none was given.
    #[error("`{record}` has an id, but no id was given")]
    MissingId { record: String },

    /// The record type has no id, but one was given.
    #[error("`{record}` doesn't have an id, but id {id} was given")]
    UnexpectedId { record: String, id: u32 },

    #[error("unknown field `{field}` on `{record}`")]
    UnknownField { record: String, field: String },

    #[error("unknown sub-field `{sub}` in composite `{field}`")]
    UnknownSubField { field: String, sub: String },

    #[error("record type `{0}` is not registered")]
    UnknownRecord(String),

    #[error("field `{field}` is read-only")]
    FieldNotWritable { field: String },

    /// The field was neither read nor assigned on this record instance.
    #[error("field `{field}` has not been loaded")]
    FieldNotLoaded { field: String },

    #[error("field `{field}` value {value} out of limits: {min} <= value <= {max}")]
    OutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("field `{field}` value is invalid: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{address} does not match the {actual} bytes given")]
    LengthMismatch {
        address: MemoryAddress,
        actual: usize,
    },

    /// Operation attempted with zero length.
    #[error("operation attempted with zero length")]
    ZeroLength,

    /// Address or length exceeds the configured page layout.
    #[error("{address} exceeds the memory layout")]
    OutOfBounds { address: MemoryAddress },

    #[error("memory space {0:?} is not configured")]
    UnknownSpace(SpaceId),

    #[error("invalid record definition `{record}`: {reason}")]
    InvalidSchema { record: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Caller-facing classification of a [`ModelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote memory could not be reached; retrying later may succeed.
    Unavailable,
    /// No record exists at the requested id.
    NotFound,
    /// The remote memory holds data that fails integrity checks.
    Corrupted,
    /// The request or the schema is wrong; retrying will not help.
    InvalidRequest,
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::Transport(_) => ErrorKind::Unavailable,
            ModelError::DoesNotExist { .. } => ErrorKind::NotFound,
            ModelError::InvalidChecksum { .. } => ErrorKind::Corrupted,
            _ => ErrorKind::InvalidRequest,
        }
    }

    pub(crate) fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        ModelError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
