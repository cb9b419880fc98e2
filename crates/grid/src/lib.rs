pub mod bucket;
pub mod index;
pub mod resolution;
pub mod view;

pub use bucket::*;
pub use index::*;
pub use resolution::*;
pub use view::*;
