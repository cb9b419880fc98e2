//! Drawn-region queries: shape validation, boundary encoding and stats.

pub mod adapter;
pub mod backend;
pub mod error;
pub mod shape;

pub use adapter::*;
pub use backend::*;
pub use error::*;
pub use shape::*;
