//! Coordinator: live tool registry, job store and job dispatch

#[allow(clippy::module_inception)]
mod coordinator;
mod registry;

pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorError};
pub use registry::{RegisteredTool, ToolRegistry, Upsert};
