//! Stream Ingestion
//!
//! Upstream readers, their supervisor, and the router that publishes
//! decoded records into the subscription hub.

mod reader;
mod retry;
mod router;
mod supervisor;

pub use reader::{ReaderPhase, SessionSnapshot, SessionStatus, StreamReader};
pub use retry::{RetryConfig, RetryPolicy};
pub use router::EventRouter;
pub use supervisor::{StoppedPair, StreamSupervisor};
