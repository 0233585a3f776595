//! Policy retrieval
//!
//! Two strategies behind one trait: cursor paging over HTTP and a search
//! subscription over the WebSocket.

pub mod cursor;
pub mod errors;
pub mod subscription;
pub mod traits;

pub use cursor::CursorSearch;
pub use errors::{SearchError, SearchResult};
pub use subscription::SubscriptionSearch;
pub use traits::{dispatch_events, PolicySearch, SearchEvent, SearchHandler};
