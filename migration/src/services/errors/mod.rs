use thiserror::Error;

use crate::services::client::ClientError;
use crate::services::streaming::SearchError;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {field} = {value}")]
    Configuration { field: String, value: String },

    #[error("Connection failed after {attempts} attempts: {message}")]
    Connection { attempts: u32, message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Search error: {source}")]
    Search {
        #[from]
        source: SearchError,
    },

    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: ClientError,
        context: String,
    },

    #[error("Report error: {path} - {reason}")]
    Report { path: String, reason: String },
}

impl From<ClientError> for MigrationError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::AuthenticationFailed { message } => {
                MigrationError::Authentication { message }
            }
            other => MigrationError::Transport {
                source: other,
                context: "Transport operation failed".to_string(),
            },
        }
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;

impl MigrationError {
    pub fn configuration(field: &str, value: impl ToString) -> Self {
        MigrationError::Configuration {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn with_context(self, context: &str) -> Self {
        match self {
            MigrationError::Transport { source, .. } => MigrationError::Transport {
                source,
                context: context.to_string(),
            },
            other => other,
        }
    }

    /// Report errors happen after the summary and do not end the run.
    /// Per-document failures never surface as a `MigrationError`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MigrationError::Report { .. })
    }

    /// Get error severity for logging/alerting purposes
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MigrationError::Configuration { .. } => ErrorSeverity::High,
            MigrationError::Authentication { .. } => ErrorSeverity::High,
            MigrationError::Connection { .. } => ErrorSeverity::Critical,
            MigrationError::Search { .. } => ErrorSeverity::High,
            MigrationError::Transport { .. } => ErrorSeverity::Medium,
            MigrationError::Report { .. } => ErrorSeverity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_map_to_authentication() {
        let err: MigrationError = ClientError::AuthenticationFailed {
            message: "bad secret".to_string(),
        }
        .into();
        assert!(matches!(err, MigrationError::Authentication { .. }));
        assert_eq!(err.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_transport_context() {
        let err: MigrationError = ClientError::NotReady.into();
        let err = err.with_context("sending modify command");
        match err {
            MigrationError::Transport { context, .. } => {
                assert_eq!(context, "sending modify command")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_report_errors_are_not_fatal() {
        let err = MigrationError::Report {
            path: "failed.json".to_string(),
            reason: "disk full".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(MigrationError::configuration("pageSize", 0).is_fatal());
    }
}
