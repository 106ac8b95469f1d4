pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source was closed; closing is permanent.
    #[error("data source is closed")]
    Closed,
    /// A write was attempted through a source opened with [`crate::access_mode::AccessMode::ReadOnly`].
    #[error("data source is opened read-only")]
    ReadOnly,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
