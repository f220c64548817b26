use thiserror::Error;

/// An error in decoding a wire message or on-disk record.
///
/// This is malformed input: the caller closes the peer connection
/// (network path) or rejects the record (disk path) without touching
/// chain state.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("io error decoding a wire/disk record: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(&'static str),
}
