pub mod budget;
pub mod clock;
pub mod coalesce;
pub mod future;
pub mod metrics;
pub mod work_queue;

pub use budget::*;
pub use clock::*;
pub use coalesce::*;
pub use future::*;
pub use metrics::*;
pub use work_queue::*;
