//! Security policies for conduit tools.
//!
//! Provides:
//! - **Path sandboxing**: file tools may only touch paths under the
//!   workspace roots and never under forbidden prefixes
//! - **Command policy**: the shell tool refuses high-risk command patterns
//! - **Audit logging**: domain events appended to a daily JSONL file

pub mod audit;
pub mod command;
pub mod path;

pub use audit::{
    AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, DailyFileSink, TracingSink,
};
pub use command::{CommandPolicy, CommandPolicyError};
pub use path::{PathValidationError, Sandbox};
