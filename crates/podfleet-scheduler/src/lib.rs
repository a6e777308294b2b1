//! podfleet-scheduler — queueing, pod lifecycle, and job tracking.
//!
//! Matches pending workflow requests to GPU pods, creating, resuming,
//! pausing and terminating pods through the [`PodProvider`], and follows
//! each dispatched job on the engine until it completes.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── RequestQueue (per-workflow FIFO of request ids)
//!   ├── RequestStore (id → WorkflowRequest)
//!   ├── Driver task (interval tick + wake on enqueue / slot release)
//!   │   └── tick: find_eligible → create_pod / resume → assign → dispatch
//!   │             then evaluate_timeouts
//!   ├── PodPool (running → paused → terminated, in-flight slots)
//!   ├── Dispatch tasks
//!   │   ├── ReadinessGate (address wait + engine health probes)
//!   │   └── EngineClient::submit
//!   └── JobMonitor (task per request polling job history)
//!       └── CompletionHandler → RequestStore + CompletionSink
//! ```
//!
//! [`PodProvider`]: podfleet_provider::PodProvider

mod dispatch;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod readiness;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use monitor::{CompletionHandler, JobMonitor, JobOutcome};
pub use notify::{BroadcastSink, CompletionSink, RequestEvent};
pub use pool::{PodPool, PoolSettings};
pub use queue::RequestQueue;
pub use readiness::ReadinessGate;
pub use scheduler::Scheduler;
