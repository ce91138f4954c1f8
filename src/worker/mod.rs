//! Worker system: hosted services that consume background work.
//!
//! Core components:
//! - `state`: lifecycle state machine (Created → Started → Running → StopRequested → Stopped)
//! - `background`: start/stop plumbing shared by every hosted loop
//! - `hosted`: `HostedService` contract and the `ServiceHost` that drives it
//! - `queued`: the single consumer of the task queue

pub mod background;
pub mod hosted;
pub mod queued;
pub mod state;

pub use background::BackgroundLoop;
pub use hosted::{HostedService, ServiceHost};
pub use queued::{QueuedHostedService, WorkOutcome, WorkerEvent, WorkerStats};
pub use state::{Lifecycle, WorkerState};
