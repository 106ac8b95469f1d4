pub type DeltaResult<T> = Result<T, DeltaError>;

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// Position or range outside of `[0, size]`. The operation had no effect.
    #[error("position {position} is out of bounds for {size} bytes")]
    OutOfBounds { position: u64, size: u64 },
    #[error("data source error: {0}")]
    Source(#[from] io::errors::SourceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("length does not fit into memory: {0}")]
    Conversion(#[from] std::num::TryFromIntError),
    #[error("operation is not supported: {0}")]
    Unsupported(&'static str),
    /// The document has no originating file to save into.
    #[error("document is not backed by a file source")]
    NoFileSource,
    /// A previous save failed half way. The document content is no longer trustworthy.
    #[error("document is poisoned by a failed save")]
    Poisoned,
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<DeltaError> for std::io::Error {
    fn from(value: DeltaError) -> Self {
        match value {
            DeltaError::Io(err) => err,
            DeltaError::Source(io::errors::SourceError::Io(err)) => err,
            DeltaError::OutOfBounds { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, value)
            }
            DeltaError::Unsupported(_) => {
                std::io::Error::new(std::io::ErrorKind::Unsupported, value)
            }
            other => std::io::Error::other(other),
        }
    }
}
