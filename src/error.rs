use thiserror::Error;

/// Main error type for every fetch-and-analyze operation
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("HTTP status error: {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Document too large: {url} exceeds {limit_bytes} bytes (received {received_bytes})")]
    SizeLimitExceeded {
        url: String,
        limit_bytes: u64,
        received_bytes: u64,
    },

    #[error("XML is not well-formed: {diagnostic}")]
    Parse { diagnostic: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network-specific error types
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Request timeout: {url} after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Connection failed: {url} - {details}")]
    Connection { url: String, details: String },

    #[error("Transfer interrupted: {url} - {details}")]
    Transfer { url: String, details: String },

    #[error("Request failed: {url} - {details}")]
    Other { url: String, details: String },
}

/// Machine-distinguishable failure kinds, independent of the message text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Network,
    HttpStatus,
    SizeLimitExceeded,
    Parse,
    Internal,
}

impl ErrorKind {
    /// Transport status a collaborator should answer with
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Input => 400,
            _ => 500,
        }
    }
}

impl XmlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            XmlError::InvalidUrl { .. } => ErrorKind::Input,
            XmlError::Network(_) => ErrorKind::Network,
            XmlError::HttpStatus { .. } => ErrorKind::HttpStatus,
            XmlError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            XmlError::Parse { .. } => ErrorKind::Parse,
            XmlError::Config(_) | XmlError::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, XmlError::Network(NetworkError::Timeout { .. }))
    }

    /// Classify a reqwest failure for `url`
    pub(crate) fn from_reqwest(url: &str, timeout_ms: u64, err: reqwest::Error) -> Self {
        let url = url.to_string();
        let network = if err.is_timeout() {
            NetworkError::Timeout { url, timeout_ms }
        } else if err.is_connect() {
            NetworkError::Connection {
                url,
                details: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            NetworkError::Transfer {
                url,
                details: err.to_string(),
            }
        } else {
            NetworkError::Other {
                url,
                details: err.to_string(),
            }
        };
        XmlError::Network(network)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, XmlError>;
