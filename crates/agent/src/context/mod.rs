//! Context window management: token estimation and budget enforcement.

pub mod token;
pub mod window;

pub use window::{Appended, Compaction, ContextBudget, ContextWindow};
