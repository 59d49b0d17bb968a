//! NDR error types

use thiserror::Error;

/// Upper bound on elements accepted from a single transmitted array
pub const MAX_NDR_ARRAY_ELEMENTS: usize = 16 * 1024 * 1024;

/// Upper bound on bytes a single decoded value may allocate
pub const MAX_NDR_ALLOCATION_SIZE: usize = 64 * 1024 * 1024;

/// Longest byte array a reader accepts, so also the longest a writer emits
pub const MAX_NDR_BYTE_ARRAY_LEN: usize = if MAX_NDR_ARRAY_ELEMENTS < MAX_NDR_ALLOCATION_SIZE {
    MAX_NDR_ARRAY_ELEMENTS
} else {
    MAX_NDR_ALLOCATION_SIZE
};

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Transmitted element count cannot fit in what is left of the buffer
    #[error("buffer overflow for size {size} of array {name}")]
    ArrayTooLarge { size: usize, name: String },

    /// Allocation request exceeds the decoder limits
    #[error("allocation limit exceeded: requested {requested}, limit {limit}")]
    AllocationLimitExceeded { requested: usize, limit: usize },

    /// Length or count does not fit the wire integer
    #[error("integer overflow: {0}")]
    IntegerOverflow(String),

    /// Invalid string - not null terminated or invalid encoding
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Referent ID reused for a pointee of another type
    #[error("invalid pointer: referent ID {0:#x}")]
    InvalidPointer(u32),

    /// Union switch value with no matching arm
    #[error("unsupported switch case value {0}")]
    InvalidDiscriminant(u32),

    /// Union arm or transmitted switch disagrees with the field it is switched by
    #[error("union switch mismatch: switched by {expected}, got {actual}")]
    SwitchMismatch { expected: u32, actual: u32 },

    /// Invalid enum value
    #[error("invalid enum value: {0}")]
    InvalidEnumValue(i32),

    /// Varying part does not fit inside the conformant bound
    #[error("conformance mismatch: max_count={max_count}, offset={offset}, actual_count={actual_count}")]
    ConformanceMismatch { max_count: u32, offset: u32, actual_count: u32 },

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// UTF-16 decoding error
    #[error("UTF-16 error: {0}")]
    Utf16Error(#[from] std::char::DecodeUtf16Error),

    /// Malformed GUID text
    #[error("invalid GUID: {0}")]
    InvalidGuid(String),
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;
