//! podfleet-state — domain types and shared state for podfleet.
//!
//! Holds the data model every other crate speaks: workflow requests, pods,
//! per-workflow timeout policies, and the `fleet.toml` configuration.
//!
//! # Architecture
//!
//! ```text
//! podfleet-state
//!   ├── types   (WorkflowRequest, Pod, TimeoutPolicy, QueueStatus)
//!   ├── store   (RequestStore: id → WorkflowRequest registry)
//!   └── config  (FleetConfig parsed from fleet.toml)
//! ```
//!
//! The `RequestStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<RwLock<..>>`) and can be shared across async tasks. Reads take a
//! short read lock and never mutate.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::FleetConfig;
pub use error::{ConfigError, ConfigResult};
pub use store::RequestStore;
pub use types::*;
