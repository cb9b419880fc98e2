//! Progressive detail loading.
//!
//! Visible items are enriched with heavier per-item detail through one
//! serialized, rate-limited queue backed by a read-through TTL cache.
//! Failed fetches are retried with exponential backoff and finally answered
//! with a fallback.

pub mod cache;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod protocol;
pub mod queue;
pub mod request;
pub mod retry;
pub mod state;

pub use cache::*;
pub use error::*;
pub use fetcher::*;
pub use loader::*;
pub use protocol::*;
pub use queue::*;
pub use request::*;
pub use retry::*;
pub use state::*;
