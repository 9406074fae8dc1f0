//! Natural-language query core.
//!
//! Infers schema shape for relational and document databases, grounds a
//! model prompt in it, validates whatever comes back against a closed
//! command grammar and executes the result with a normalized envelope.
//!
//! ```text
//! QueryEngine ──► Backend (Relational | Document)
//!                   ├─ introspect ──► connector session
//!                   ├─ build_prompt / fallback_query
//!                   ├─ parse_command ──► grammar::Command
//!                   └─ execute ──► connector session ──► QueryPayload
//! ```

pub mod backend;
pub mod connector;
pub mod engine;
pub mod generator;
pub mod grammar;
pub mod introspect;
pub mod llm;
pub mod normalize;
pub mod prompt;

pub use backend::{Backend, DocumentBackend, RelationalBackend};
pub use engine::{ConnectionCheck, ModelProbe, QueryEngine};
pub use generator::{Generation, Generator};
pub use grammar::{parse_command, Command};
pub use llm::{GeminiClient, LanguageModel, ProviderError};
