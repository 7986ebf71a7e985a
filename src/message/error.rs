use thiserror::Error;

use super::{HEADER_SIZE, MAX_FRAME_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("frame length {0} is shorter than the {HEADER_SIZE}-byte header")]
    LengthTooSmall(u32),

    #[error("frame length {0} exceeds the {MAX_FRAME_SIZE}-byte frame limit")]
    LengthTooLarge(u32),

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("message body does not fit the framed length")]
    MalformedBody,
}
