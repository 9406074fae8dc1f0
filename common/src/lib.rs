//! Shared building blocks for the natural-language query workspace.
//!
//! Holds the error taxonomy, configuration, the response envelope, the data
//! models exchanged between the engine and the HTTP layer, and middleware.

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
