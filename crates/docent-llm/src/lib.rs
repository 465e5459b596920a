//! LLM provider abstraction and backend implementations.
//!
//! One trait, interchangeable backends: OpenAI, any OpenAI-compatible
//! endpoint (Groq, Gemini), and local Ollama. Chat, incremental token
//! streams, and embeddings share a single error taxonomy so callers can
//! classify failures without knowing which backend is configured.

pub mod any;
pub mod compatible;
pub mod error;
mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
mod sse;

pub use error::LlmError;
pub use provider::LlmProvider;
