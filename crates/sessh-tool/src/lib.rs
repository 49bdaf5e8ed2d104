//! sessh-tool - sessh operations exposed as callable tools
//!
//! This crate provides:
//! - Argument schemas and validation for the five session operations
//! - The sessh process invoker and its result validation
//! - The fixed operation table and a dispatcher running a call end to end

pub mod error;
pub mod executor;
pub mod operations;
pub mod registry;
pub mod types;

pub use error::{Result, ToolError};
pub use executor::{ensure_ok, CommandRunner, OutputBuffer, SesshInvoker};
pub use registry::{Dispatcher, OperationRegistry};
pub use types::{
    ArgDef, ArgType, ContentBlock, InvocationRequest, InvocationResult, OperationDescriptor,
    OptionalArg, Termination, ToolArgs,
};

/// Re-export async_trait for implementers
pub use async_trait::async_trait;
/// Re-export so callers can cancel in-flight invocations
pub use tokio_util::sync::CancellationToken;
