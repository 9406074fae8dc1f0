//! Shared data models.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{BackendKind, Credentials, DEFAULT_AUTH_DATABASE, DEFAULT_DOCUMENT_DATABASE};
pub use query::{
    ConnectionRequest, ExecuteQueryRequest, GenerateQueryRequest, GeneratedQuery, GenerationSource,
    MutationSummary, QueryPayload, Row, SchemaRequest,
};
pub use schema::{ColumnDescriptor, SchemaMap, TableItem, TableKind};
