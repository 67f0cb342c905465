//! Wire framing error types.

use thiserror::Error;

/// Errors raised while encoding or decoding letter frames
#[derive(Error, Debug)]
pub enum WireError {
    /// Frame structure does not add up (lengths, field counts)
    #[error("malformed frame")]
    Malformed,

    /// Frame length exceeds the configured maximum
    #[error("frame size limit exceeded: {0}")]
    Size(usize),

    /// Unknown letter type code
    #[error("unknown letter type {0}")]
    Kind(u8),

    /// Unknown part type code
    #[error("unknown part type {0}")]
    Part(u8),

    /// Option bits outside the defined set
    #[error("invalid option bits {0:#04x}")]
    Options(u8),
}
