/// Errors raised by the inbox client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the next scheduled cycle may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Decode(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Storage(_) | Self::Config(_) => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { status: 401, .. } => "unauthorized",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
