//! Tool capability and executor definitions
//!
//! A tool is a named capability described by a [`ToolDescriptor`]. Anything
//! implementing [`ToolCapability`] can be hosted by a
//! [`ToolWorker`](super::ToolWorker); [`Tool`] is the usual implementation,
//! binding a descriptor to an injected [`ToolExecutor`].

use super::result::JobResults;
use super::schema::check_schema_set;
use super::validation::{ValidationError, validate_arguments};
use super::value::ExecutionArguments;
use crate::error::{Result, ToolbusError};
use crate::jobs::ExecutionRequest;
use crate::protocol::ToolDescriptor;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Execution-side failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The tool has no executor bound
    #[error("no executor bound to tool '{0}'")]
    NoExecutor(String),

    /// The executor reported a failure
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
}

/// Capability exposed by a tool worker
///
/// Implementors only need a descriptor and an `execute`; validation defaults
/// to the descriptor's parameter schemas.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    /// Descriptor announced on the bus
    fn descriptor(&self) -> &ToolDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Canonicalize arguments against the declared parameters
    fn validate(
        &self,
        arguments: &ExecutionArguments,
    ) -> std::result::Result<ExecutionArguments, ValidationError> {
        validate_arguments(&self.descriptor().parameters, arguments)
    }

    /// Run one job against already-validated arguments
    async fn execute(&self, request: ExecutionRequest) -> Result<JobResults>;
}

/// Executor injected by the hosting application
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<JobResults>;
}

/// Adapts an async closure into a [`ToolExecutor`]
pub struct FnExecutor<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(ExecutionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobResults>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F, Fut>
where
    F: Fn(ExecutionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobResults>> + Send,
{
    async fn execute(&self, request: ExecutionRequest) -> Result<JobResults> {
        (self.func)(request).await
    }
}

/// Descriptor bound to an optional executor
#[derive(Clone)]
pub struct Tool {
    descriptor: ToolDescriptor,
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl Tool {
    /// Tool without an executor; every job it receives fails
    pub fn new(descriptor: ToolDescriptor) -> Result<Self> {
        check_schema_set(&descriptor.parameters)?;
        Ok(Self {
            descriptor,
            executor: None,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Bind an async closure as the executor
    pub fn with_fn<F, Fut>(self, func: F) -> Self
    where
        F: Fn(ExecutionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobResults>> + Send + 'static,
    {
        self.with_executor(Arc::new(FnExecutor::new(func)))
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("descriptor", &self.descriptor)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

#[async_trait]
impl ToolCapability for Tool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<JobResults> {
        match &self.executor {
            Some(executor) => executor.execute(request).await,
            None => Err(ToolbusError::Tool(ToolError::NoExecutor(
                self.descriptor.name.clone(),
            ))),
        }
    }
}

/// Shared tool handle
pub type BoxedTool = Arc<dyn ToolCapability>;
