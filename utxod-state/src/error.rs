use thiserror::Error;

/// A storage-layer failure (write failure, disk space exhaustion, corrupt
/// record). Every variant here is treated as fatal by the chain
/// engine — the enclosing transaction aborts and the node initiates
/// shutdown rather than continuing on a possibly-inconsistent index.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("block store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index error: {0}")]
    Index(#[from] sled::Error),
    #[error("corrupt on-disk record: {0}")]
    Corrupt(&'static str),
    #[error("codec error reading a stored record: {0}")]
    Codec(#[from] utxod_chain::CodecError),
    #[error("no block file is open")]
    NoActiveFile,
}
