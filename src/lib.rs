//! Tag search over a photo catalog with a cancellable, single-active search
//! session. [`QueryClient`] performs the network calls; [`SearchSessionController`]
//! sequences them for a view layer.

pub mod config;
pub mod photos;
pub mod query;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, ResponseFormat, SearchConfig};
pub use query::{normalize_tags, CancellationHandle, HttpTransport, PendingFetch, QueryClient, Transport};
pub use session::{ChannelConsumer, SearchSessionController, SessionClosed, SessionConsumer, SessionHandle};
pub use types::*;
