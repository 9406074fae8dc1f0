//! Driver seams.
//!
//! Backends never talk to a driver directly. They ask a connector for a
//! session, use it for one operation and close it. Production connectors
//! wrap `sqlx` (MySQL) and the `mongodb` driver; tests substitute stubs.

pub mod mongo;
pub mod mysql;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use common::errors::AppResult;
use common::models::{ColumnDescriptor, Credentials, Row};

use crate::grammar::DocumentCommand;

pub use mongo::MongoConnector;
pub use mysql::MySqlConnector;

/// Outcome of a non-row-returning relational statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlOutcome {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// Opens relational sessions.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Opens one live connection; fails with `AppError::Connection`.
    async fn open(&self, credentials: &Credentials) -> AppResult<Box<dyn SqlSession>>;
}

/// One open relational connection.
#[async_trait]
pub trait SqlSession: Send {
    /// Column metadata for an already sanitized table name.
    async fn describe(&mut self, table: &str) -> AppResult<Vec<ColumnDescriptor>>;

    async fn fetch_rows(&mut self, statement: &str) -> AppResult<Vec<Row>>;

    async fn execute(&mut self, statement: &str) -> AppResult<SqlOutcome>;

    async fn list_tables(&mut self) -> AppResult<Vec<String>>;

    async fn ping(&mut self) -> AppResult<()>;

    /// Releases the connection. Must be called on every path.
    async fn close(self: Box<Self>);
}

/// Raw outcome of a document command before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Documents(Vec<Document>),
    Count(u64),
    Inserted(Vec<Bson>),
    Updated { matched: u64, modified: u64 },
    Deleted(u64),
    Collections(Vec<String>),
}

/// Opens document sessions.
#[async_trait]
pub trait DocumentConnector: Send + Sync {
    /// Opens one client for the resolved database; fails with
    /// `AppError::Connection`.
    async fn open(&self, credentials: &Credentials) -> AppResult<Box<dyn DocumentSession>>;
}

/// One open document-database client bound to a database.
#[async_trait]
pub trait DocumentSession: Send {
    /// Up to `limit` documents from `collection`.
    async fn sample(&mut self, collection: &str, limit: i64) -> AppResult<Vec<Document>>;

    async fn run(&mut self, command: &DocumentCommand) -> AppResult<DocumentOutcome>;

    async fn list_collections(&mut self) -> AppResult<Vec<String>>;

    async fn ping(&mut self) -> AppResult<()>;

    /// Shuts the client down. Must be called on every path.
    async fn close(self: Box<Self>);
}
