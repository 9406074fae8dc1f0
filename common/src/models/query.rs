//! Query models.
//!
//! Request bodies for the core operations and the normalized payloads they
//! produce.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::connection::{BackendKind, Credentials};

/// One result row/document: column or field name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Request body that only identifies a backend.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    #[serde(alias = "dbType")]
    pub backend: BackendKind,
    #[validate(nested)]
    pub credentials: Credentials,
}

/// Request body for schema introspection.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRequest {
    #[serde(alias = "dbType")]
    pub backend: BackendKind,
    #[validate(nested)]
    pub credentials: Credentials,
    /// Tables or collections to describe.
    #[serde(default, alias = "selectedTables")]
    #[validate(length(max = 100, message = "at most 100 tables per request"))]
    pub tables: Vec<String>,
}

/// Request body for natural-language query generation.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQueryRequest {
    #[serde(alias = "dbType")]
    pub backend: BackendKind,
    #[validate(nested)]
    pub credentials: Credentials,
    /// What the user wants, in plain language.
    #[validate(length(min = 1, max = 4000, message = "natural language text is required"))]
    pub natural_language: String,
    #[serde(default, alias = "selectedTables")]
    #[validate(length(max = 100, message = "at most 100 tables per request"))]
    pub tables: Vec<String>,
}

/// Request body for executing (possibly user-edited) query text.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryRequest {
    #[serde(alias = "dbType")]
    pub backend: BackendKind,
    #[validate(nested)]
    pub credentials: Credentials,
    #[validate(length(min = 1, max = 100000, message = "query text is required"))]
    pub query: String,
}

/// Where a generated query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GenerationSource {
    /// The language model produced a grammar-conforming query.
    Model,
    /// The deterministic keyword generator was used.
    Fallback,
}

/// Result of query generation, ready for review before execution.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuery {
    /// Normalized, validated query text.
    pub query: String,
    pub backend: BackendKind,
    /// Grammar production the query matched (e.g. `select`, `deleteMany`).
    pub operation: String,
    pub source: GenerationSource,
    /// Why the model output was not used, when the fallback ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Summary of a mutating command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MutationSummary {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub inserted_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub inserted_ids: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<bool>,
}

impl MutationSummary {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Normalized execution payload: rows for reads, a summary for mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub rows: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MutationSummary>,
    /// Number of rows returned (0 for mutations).
    pub row_count: usize,
}

impl QueryPayload {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            row_count: rows.len(),
            rows: Some(rows),
            summary: None,
        }
    }

    pub fn summary(summary: MutationSummary) -> Self {
        Self {
            rows: None,
            summary: Some(summary),
            row_count: 0,
        }
    }
}
