//! # Toolbus - tool discovery and job dispatch over pub/sub
//!
//! Independent worker processes advertise tools on a publish/subscribe bus;
//! a coordinator keeps a TTL-bounded registry of live tools, dispatches jobs
//! to them and tracks each job from the status updates the tool publishes.
//! Job arguments usually come from model-generated function calls, so they
//! are canonicalized against each tool's declared parameter schemas
//! (aliases, case-insensitive keys, defaults, fixed values) before dispatch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolbus_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pubsub: SharedPubSub = Arc::new(LocalPubSub::new());
//!
//!     let coordinator = Coordinator::builder(pubsub.clone()).build();
//!     coordinator.start().await?;
//!
//!     let job = coordinator
//!         .submit_job(ExecutionRequest::new(
//!             "j1",
//!             "search",
//!             ExecutionArguments::new().with("Query", "cats"),
//!         ))
//!         .await?;
//!     let status = job.wait_until_ended().await;
//!     println!("{} ended {}", job.job_id(), status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `pubsub-nats`: NATS transport backend

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod jobs;
pub mod protocol;
pub mod pubsub;
pub mod tools;

pub use error::{Result, ToolbusError};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::{CoordinatorConfig, PubSubConfig, ToolbusConfig, WorkerConfig};
    pub use crate::coordinator::{Coordinator, CoordinatorError, RegisteredTool};
    pub use crate::error::{Result, ToolbusError};
    pub use crate::jobs::{ExecutionRequest, Job, JobError, JobSnapshot, JobStatus};
    pub use crate::protocol::{FileDescriptor, JobRequest, JobUpdate, ToolDescriptor, Topics};
    pub use crate::pubsub::{
        LocalPubSub, PubSub, PubSubBackend, PubSubBuilder, PubSubExt, PubSubInstance,
        PubSubMessage, PubSubMode, SharedPubSub, SubscriptionHandle,
    };
    pub use crate::tools::{
        ArgValue, ExecutionArguments, FunctionTool, JobResults, ParamType, ParameterSchema, Tool,
        ToolCapability, ToolError, ToolExecutor, ToolWorker, ValidationError, validate_arguments,
    };
}
