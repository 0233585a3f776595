//! Errors raised while retrieving policies

use serde_json::Value;
use thiserror::Error;

use crate::services::client::ClientError;

#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Search request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Search transport error: {0}")]
    Client(#[from] ClientError),

    #[error("Invalid search response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Search subscription failed: {payload}")]
    SubscriptionFailed { payload: Value },

    #[error("Search not started")]
    NotStarted,
}

pub type SearchResult<T> = Result<T, SearchError>;
