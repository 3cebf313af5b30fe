//! Reasoning provider access: the provider seam, retry policy, guardrails,
//! prompts and response parsing.

pub mod client;
pub mod guardrails;
pub mod parse;
pub mod prompts;
pub mod retry;

pub use client::{
    ChatMessage, Completion, CompletionRequest, DirectFixRequest, DirectFixResponse, OpenRouterProvider,
    ReasoningClient, ReasoningProvider, Role, Usage,
};
pub use guardrails::GuardrailRejection;
pub use parse::parse_tool_calls;
pub use retry::RetryPolicy;
