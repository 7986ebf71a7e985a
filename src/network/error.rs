use thiserror::Error;

use crate::message::CodecError;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,
}
