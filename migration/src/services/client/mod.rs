//! Client side of the store connection: credentials, envelope and transports

pub mod auth;
pub mod errors;
pub mod transport;
pub mod types;

pub use auth::{AuthMethod, CredentialProvider, TokenGenerator};
pub use errors::{ClientError, ClientResult};
pub use transport::{connect_with_retry, HttpTransport, Inbound, RetryPolicy, Transport, WebSocketTransport};
pub use types::DittoMessage;
