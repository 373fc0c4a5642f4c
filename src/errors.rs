use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, FbxError>;

#[derive(Error, Debug)]
pub enum FbxError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("Device answered with HTTP status {0}")]
    HttpStatus(u16),
    #[error("Decoding error: {0}")]
    Decode(String),
    #[error("API error [{code}] {msg}")]
    Api { code: String, msg: String },
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Upload failed [{code}] {msg}")]
    Upload { code: String, msg: String },
    #[error("Path template error: {0}")]
    Template(String),
    #[error("Invalid request: {0}")]
    Request(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Connection closed while waiting for {0}")]
    Closed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Layer a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    HttpStatus,
    Decode,
    Api,
    Auth,
    Upload,
    /// The call was malformed and never reached the network.
    Usage,
    Cancelled,
}

impl FbxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FbxError::Transport(_)
            | FbxError::WebSocket(_)
            | FbxError::Tls(_)
            | FbxError::Timeout(_)
            | FbxError::Closed(_)
            | FbxError::Io(_) => ErrorKind::Transport,
            FbxError::HttpStatus(_) => ErrorKind::HttpStatus,
            FbxError::Decode(_) => ErrorKind::Decode,
            FbxError::Api { .. } => ErrorKind::Api,
            FbxError::Auth(_) => ErrorKind::Auth,
            FbxError::Upload { .. } => ErrorKind::Upload,
            FbxError::Template(_) | FbxError::Request(_) => ErrorKind::Usage,
            FbxError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Error code reported by the device, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            FbxError::Api { code, .. } | FbxError::Upload { code, .. } => {
                Some(code.as_str())
            }
            _ => None,
        }
    }

    /// A copy for callers that share one failed operation. Variants
    /// wrapping foreign errors keep their kind but only their message.
    pub(crate) fn replay(&self) -> Self {
        match self {
            FbxError::Transport(e) => Self::shared_io(e),
            FbxError::WebSocket(e) => Self::shared_io(e),
            FbxError::Io(e) => {
                Self::Io(std::io::Error::new(e.kind(), e.to_string()))
            }
            FbxError::Tls(msg) => FbxError::Tls(msg.clone()),
            FbxError::HttpStatus(status) => FbxError::HttpStatus(*status),
            FbxError::Decode(msg) => FbxError::Decode(msg.clone()),
            FbxError::Api { code, msg } => {
                FbxError::api(code.clone(), msg.clone())
            }
            FbxError::Auth(msg) => FbxError::Auth(msg.clone()),
            FbxError::Upload { code, msg } => {
                FbxError::upload(code.clone(), msg.clone())
            }
            FbxError::Template(msg) => FbxError::Template(msg.clone()),
            FbxError::Request(msg) => FbxError::Request(msg.clone()),
            FbxError::Timeout(what) => FbxError::Timeout(what.clone()),
            FbxError::Cancelled => FbxError::Cancelled,
            FbxError::Closed(what) => FbxError::Closed(what.clone()),
        }
    }

    fn shared_io(e: &impl std::fmt::Display) -> Self {
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        ))
    }

    pub(crate) fn api(
        code: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        FbxError::Api {
            code: code.into(),
            msg: msg.into(),
        }
    }

    pub(crate) fn upload(
        code: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        FbxError::Upload {
            code: code.into(),
            msg: msg.into(),
        }
    }
}

impl From<tungstenite::Error> for FbxError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl From<serde_json::Error> for FbxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<url::ParseError> for FbxError {
    fn from(e: url::ParseError) -> Self {
        Self::Request(format!("invalid URL: {}", e))
    }
}

impl From<tokio::task::JoinError> for FbxError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
