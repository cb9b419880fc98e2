pub mod bounds;
pub mod ids;
pub mod math;
pub mod observation;
pub mod time;

// Foundation crate: small, well-tested primitives only.
pub use bounds::*;
pub use ids::*;
pub use observation::*;
pub use time::*;
