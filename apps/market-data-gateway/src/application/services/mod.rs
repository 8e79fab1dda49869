//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PairLifecycleService`: Turns pair create/delete events into topic
//!   registration and stream reader start/stop

mod lifecycle;

pub use lifecycle::{LifecycleError, PairLifecycleService};
