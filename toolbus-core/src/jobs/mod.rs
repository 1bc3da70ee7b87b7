//! Jobs: execution state and lifecycle
//!
//! A job is created `Queued` when submitted and afterwards only moves in
//! response to [`JobUpdate`](crate::protocol::JobUpdate)s published by the
//! executing tool.

mod job;
mod status;
mod store;

pub use job::{DEFAULT_UPDATE_BUFFER, ExecutionRequest, Job, JobError, JobSnapshot};
pub use status::JobStatus;
pub use store::JobStore;
