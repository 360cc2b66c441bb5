use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("slot accounting violated: {0}")]
    SlotAccounting(String),
    #[error("decompression error: {0}")]
    DecompressionError(String),
    #[error("invalid archive catalog: {0}")]
    InvalidCatalog(String),
    #[error("range {offset}+{size} lies outside a {len} byte file")]
    OutOfRange { offset: u64, size: u64, len: u64 },
    #[error("unknown or released request handle")]
    UnknownRequest,
    #[error("request for {0} failed")]
    RequestFailed(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StreamError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidCatalog(error.to_string())
    }
}
