//! # conduit core
//!
//! Domain types, contracts, and the error taxonomy for the conduit
//! orchestration engine. This crate does no I/O: it defines the model that
//! the other crates implement against.
//!
//! ## Contracts
//!
//! - [`Tool`]: a side-effecting capability behind a uniform call interface
//! - [`ModelTransport`]: the streaming LLM backend
//! - [`SessionStore`]: durable, append-only session logs

pub mod error;
pub mod event;
pub mod message;
pub mod session;
pub mod tool;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorCode, Result, StoreError, ToolError, ToolFailure, TransportError};
pub use event::{DomainEvent, EventBus};
pub use message::{ContentBlock, Message, Role};
pub use session::{Session, SessionId, SessionStatus, SessionStore, SessionSummary};
pub use tool::{
    ExecutionMetadata, RetryPolicy, Tool, ToolCallRequest, ToolContext, ToolDefinition,
    ToolOutcome, ToolRegistry, ToolRegistryBuilder, ToolResult,
};
pub use transport::{
    ModelTransport, ToolSchema, TransportEvent, TransportRequest, TransportStream, Usage,
};
