use std::sync::Arc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    /// A slice bound was non-finite, negative, fractional or reversed.
    #[error("invalid slice: {0}")]
    InvalidSlice(String),
    /// More dimensions were sliced at once than the reader supports.
    #[error("cannot slice more than {max} dimensions at a time, tried to slice {ndim} for {path}")]
    UnsupportedSlice {
        path: String,
        ndim: usize,
        max: usize,
    },
    /// The object looks like an archive but is not valid ustar.
    #[error("corrupt archive {url}: {reason}")]
    CorruptArchive { url: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout {
        request_id: u64,
        timeout: std::time::Duration,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("request was canceled")]
    Canceled,
    /// A manifest is malformed, e.g. a ref whose byte range overflows.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    /// No reader is configured for the operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    ArrayCreate(#[from] zarrs::array::ArrayCreateError),
    #[error(transparent)]
    Array(#[from] zarrs::array::ArrayError),
    /// The same failure delivered to every waiter of a shared request.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } | Self::Canceled => true,
            Self::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// The underlying error of a [`Error::Shared`] error.
    pub fn unshared(&self) -> &Self {
        match self {
            Self::Shared(inner) => inner.unshared(),
            other => other,
        }
    }

    /// Whether this error means the requested object definitely does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(value: Arc<Error>) -> Self {
        Self::Shared(value)
    }
}
