//! Core-facing facade over the tile, source, detail and region crates.
//!
//! An [`Explorer`] is what a map viewer talks to: it turns points into tiles
//! for the current view, pages merged observations, enriches visible items
//! and resolves drawn regions. [`ExplorerConfig`] wires it to real upstreams.

pub mod config;
pub mod explorer;

pub use config::*;
pub use explorer::*;
