//! Connection models.
//!
//! Backend selection and the transient credentials used to open one live
//! connection per operation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Database used for document backends when the credentials name none.
pub const DEFAULT_DOCUMENT_DATABASE: &str = "test";
/// Authentication database for document backends when none is given.
pub const DEFAULT_AUTH_DATABASE: &str = "admin";

/// Which database model a request targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Relational/tabular database (MySQL dialect).
    #[serde(alias = "mysql", alias = "sql")]
    Relational,
    /// Document database (MongoDB shell dialect).
    #[serde(alias = "mongodb", alias = "mongo")]
    Document,
}

impl BackendKind {
    /// Default port for this backend kind.
    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Relational => 3306,
            BackendKind::Document => 27017,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Relational => write!(f, "relational"),
            BackendKind::Document => write!(f, "document"),
        }
    }
}

/// Decrypted connection credentials supplied by the credential store.
#[derive(Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Backend host.
    #[validate(length(min = 1, message = "host is required"))]
    pub host: String,
    /// Backend port (backend default when absent).
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Database / schema name.
    #[serde(default)]
    pub database: Option<String>,
    /// Authentication database (document backends only).
    #[serde(default)]
    pub auth_database: Option<String>,
}

impl Credentials {
    /// Creates credentials for `host` with everything else unset.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: None,
            password: None,
            database: None,
            auth_database: None,
        }
    }

    /// Port to connect to.
    pub fn port_or_default(&self, kind: BackendKind) -> u16 {
        self.port.unwrap_or_else(|| kind.default_port())
    }

    /// Database to operate on.
    ///
    /// Document backends always resolve to a name (`test` when unset);
    /// relational backends may connect without a default schema.
    pub fn resolved_database(&self, kind: BackendKind) -> Option<String> {
        let given = self
            .database
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        match kind {
            BackendKind::Relational => given,
            BackendKind::Document => {
                Some(given.unwrap_or_else(|| DEFAULT_DOCUMENT_DATABASE.to_string()))
            }
        }
    }

    /// Authentication source for document backends.
    pub fn resolved_auth_database(&self) -> String {
        self.auth_database
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_AUTH_DATABASE)
            .to_string()
    }

    /// Username and password, only when both are present and non-empty.
    pub fn login(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("auth_database", &self.auth_database)
            .finish()
    }
}
