//! Multi-source paginated fetching.
//!
//! Several upstream collections are paginated independently, each through its
//! own [`SourceCursor`]. The [`FetchCoordinator`] queries every source that
//! still has pages, degrades failed sources to empty, and hands back one
//! deduplicated, globally ordered batch that a [`MergedCollection`] absorbs.
//!
//! Guarantees per round:
//! - a source that errors never fails the round; its cursor is marked
//!   `failed` and stops paging;
//! - a filter change cancels every round still in flight
//!   ([`FetchError::Superseded`]);
//! - cursors come back in the order they went in.
//!
//! [`HttpSourceFetcher`] speaks the upstream REST APIs; [`MemoryFetcher`]
//! serves canned pages for tests.

pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod filters;
pub mod http;
pub mod merge;

pub use coordinator::*;
pub use cursor::*;
pub use error::*;
pub use fetcher::*;
pub use filters::*;
pub use http::*;
pub use merge::*;
