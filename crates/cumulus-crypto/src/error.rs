use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("master key is not set")]
    MasterKeyMissing,

    #[error("invalid master key: {0}")]
    MasterKeyInvalid(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("encryption metadata not loaded")]
    MetadataMissing,

    #[error("invalid encryption metadata: {0}")]
    MetadataInvalid(String),

    #[error("wrapped key too short: {0} bytes")]
    WrappedKeyTooShort(usize),

    #[error("source not set")]
    SourceMissing,

    #[error("source does not support seeking")]
    SourceNotSeekable,

    #[error("total size unknown, required to seek from the end")]
    SizeUnknown,

    #[error("negative seek position: {0}")]
    NegativePosition(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
