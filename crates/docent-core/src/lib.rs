//! Configuration, context assembly, and the grounded answer engine.
//!
//! The engine wires the retriever and a generation provider into one
//! `ask` pipeline: retrieve relevant chunks, assemble a cited prompt,
//! generate (optionally streaming, cancellable), and map the answer's
//! citation markers back to the sources that grounded it. Upstream
//! trouble degrades into an apology rather than an error; only failures
//! needing operator attention surface as `EngineError`.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod history;

pub use engine::{Answer, Engine, EngineConfig};
pub use error::{EngineError, Result};
