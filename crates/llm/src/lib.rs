//! Provider-agnostic LLM client.
//!
//! One tagged backend enum covers the hosted providers, a local Ollama
//! instance and a scripted responder for tests. Structured output is
//! schema-validated and re-prompted on violation.

pub mod client;
pub mod provider;

pub use client::{ChatMessage, ChatRole, GenerationParams, LlmClient, ResponseFormat};
pub use provider::{FailureKind, LlmBackend, ScriptedReply, StaticBackend};
