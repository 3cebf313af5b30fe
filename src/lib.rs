//! migrate-doctor library crate
//!
//! Diagnoses build and runtime failures left behind by a framework
//! major-version migration and produces file edits to repair them: a
//! deterministic fast path for known signatures, and a bounded
//! investigation agent for everything else.

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod fast_path;
pub mod llm;
pub mod tools;
pub mod types;

pub use agent::{FixAgent, FixRequest};
pub use config::Config;
pub use types::{FailureSignature, FixResult};
