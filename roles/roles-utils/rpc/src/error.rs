use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: status {0}")]
    Http(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RpcError {
    /// Whether the retry policy should try the request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Network(_)
                | RpcError::Http(_)
                | RpcError::Rpc { .. }
                | RpcError::Timeout
                | RpcError::Decode(_)
        )
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RpcError::Timeout
        } else if let Some(status) = err.status() {
            RpcError::Http(status.as_u16())
        } else if err.is_decode() {
            RpcError::Decode(err.to_string())
        } else {
            RpcError::Network(err.to_string())
        }
    }
}
