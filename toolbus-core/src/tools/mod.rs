//! Tool side of the bus
//!
//! This module holds everything a tool process needs:
//! - Declarative parameter schemas and the argument validator
//! - The [`ToolCapability`] seam and the executor-backed [`Tool`]
//! - [`ToolWorker`], which announces a tool and runs the jobs sent to it
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolbus_core::prelude::*;
//!
//! # async fn example() -> toolbus_core::Result<()> {
//! let descriptor = ToolDescriptor::new("search", "Web search")
//!     .with_parameter(ParameterSchema::string("query").with_alias("Query").required());
//!
//! let tool = Tool::new(descriptor)?.with_fn(|request| async move {
//!     let query = request.arguments.get_str("query").unwrap_or_default().to_string();
//!     Ok(JobResults::new(request.job_id, request.tool_name)
//!         .with_text(format!("results for {query}"))
//!         .completed())
//! });
//!
//! let pubsub: SharedPubSub = Arc::new(LocalPubSub::new());
//! let worker = ToolWorker::new(tool, pubsub)?.start().await?;
//! # worker.shutdown();
//! # Ok(())
//! # }
//! ```

mod function;
mod result;
mod schema;
mod tool;
mod validation;
mod value;
mod worker;

pub use function::{FunctionDefinition, FunctionItems, FunctionParameter, FunctionParameters, FunctionTool};
pub use result::JobResults;
pub use schema::{ParamType, ParameterSchema, SchemaError, check_schema_set};
pub use tool::{BoxedTool, FnExecutor, Tool, ToolCapability, ToolError, ToolExecutor};
pub use validation::{ValidationError, validate_arguments};
pub use value::{ArgValue, ExecutionArguments};
pub use worker::{DEFAULT_ANNOUNCE_INTERVAL, ToolWorker};
