//! Utility functions and helpers.

pub mod identifier;

// Re-export commonly used functions
pub use identifier::{
    is_collection_name, is_plain_identifier, sanitize_collection_name, sanitize_table_name,
};
