//! Command grammars.
//!
//! Every query, whether produced by the model, by the fallback generator or
//! edited by a user, must parse into a [`Command`] before it reaches a
//! database.

pub mod literal;
pub mod mongo;
pub mod sql;

use common::errors::AppResult;
use common::models::BackendKind;

pub use mongo::DocumentCommand;
pub use sql::{SqlCommand, SqlOperation};

/// Maximum rows/documents a read may return.
pub const ROW_CAP: u64 = 100;

/// A command that passed validation for its backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sql(SqlCommand),
    Document(DocumentCommand),
}

impl Command {
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            Command::Sql(_) => BackendKind::Relational,
            Command::Document(_) => BackendKind::Document,
        }
    }

    /// Grammar production name, e.g. `select` or `deleteMany`.
    pub fn operation(&self) -> &'static str {
        match self {
            Command::Sql(cmd) => cmd.operation.name(),
            Command::Document(cmd) => cmd.name(),
        }
    }

    pub fn is_read(&self) -> bool {
        match self {
            Command::Sql(cmd) => cmd.operation == SqlOperation::Select,
            Command::Document(cmd) => cmd.is_read(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Sql(cmd) => cmd.fmt(f),
            Command::Document(cmd) => cmd.fmt(f),
        }
    }
}

/// Parses `text` with the grammar of `kind`.
pub fn parse_command(kind: BackendKind, text: &str) -> AppResult<Command> {
    match kind {
        BackendKind::Relational => sql::parse(text).map(Command::Sql),
        BackendKind::Document => mongo::parse(text).map(Command::Document),
    }
}
