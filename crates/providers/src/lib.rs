//! Model transport implementations for conduit.
//!
//! All transports implement `conduit_core::ModelTransport`. Retry and backoff
//! for provider errors happen here, before a stream starts; the orchestration
//! core only ever sees a terminal failure.

pub mod backoff;
pub mod openai_compat;

pub use backoff::Backoff;
pub use openai_compat::OpenAiCompatTransport;
