use std::fmt;

/// Transport and credential errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// `send`/`close` called before a successful `connect`
    NotReady,
    /// Credential acquisition failed
    AuthenticationFailed {
        message: String,
    },
    /// Network error
    NetworkError {
        message: String,
    },
    /// Serialization error
    SerializationError {
        message: String,
    },
    /// Endpoint could not be parsed or decorated
    InvalidEndpoint {
        endpoint: String,
        message: String,
    },
    /// The remote side closed the connection
    ConnectionClosed {
        reason: String,
    },
    /// Command the transport does not know how to deliver
    UnsupportedCommand {
        topic: String,
    },
    /// Invalid response format
    InvalidResponse {
        expected: String,
        got: String,
    },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotReady => {
                write!(f, "Connection not ready")
            }
            ClientError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            ClientError::NetworkError { message } => {
                write!(f, "Network error: {}", message)
            }
            ClientError::SerializationError { message } => {
                write!(f, "Serialization error: {}", message)
            }
            ClientError::InvalidEndpoint { endpoint, message } => {
                write!(f, "Invalid endpoint '{}': {}", endpoint, message)
            }
            ClientError::ConnectionClosed { reason } => {
                write!(f, "Connection closed: {}", reason)
            }
            ClientError::UnsupportedCommand { topic } => {
                write!(f, "Unsupported command for this transport: {}", topic)
            }
            ClientError::InvalidResponse { expected, got } => {
                write!(f, "Invalid response format: expected {}, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::NetworkError {
            message: err.to_string(),
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
