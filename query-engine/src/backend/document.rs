//! Document (MongoDB shell dialect) backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, Credentials, MutationSummary, QueryPayload, Row, SchemaMap, TableItem, TableKind,
};
use common::utils::sanitize_collection_name;

use super::Backend;
use crate::connector::{DocumentConnector, DocumentOutcome};
use crate::generator::{document_fallback, fallback_target, FallbackIntent};
use crate::grammar::{Command, DocumentCommand, ROW_CAP};
use crate::introspect::{infer_columns, SAMPLE_SIZE};
use crate::normalize::{bson_to_json, document_to_row};

pub struct DocumentBackend {
    connector: Arc<dyn DocumentConnector>,
}

impl DocumentBackend {
    pub fn new(connector: Arc<dyn DocumentConnector>) -> Self {
        Self { connector }
    }
}

fn single_row(value: Value) -> Vec<Row> {
    match value {
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}

/// Maps a driver outcome onto the normalized payload for `command`.
pub fn normalize_outcome(command: &DocumentCommand, outcome: DocumentOutcome) -> AppResult<QueryPayload> {
    let payload = match (command, outcome) {
        (DocumentCommand::Find { .. }, DocumentOutcome::Documents(mut docs)) => {
            docs.truncate(ROW_CAP as usize);
            QueryPayload::rows(docs.into_iter().map(document_to_row).collect())
        }
        (DocumentCommand::CountDocuments { .. }, DocumentOutcome::Count(count)) => {
            QueryPayload::rows(single_row(json!({ "count": count })))
        }
        (DocumentCommand::ShowCollections, DocumentOutcome::Collections(names)) => {
            QueryPayload::rows(
                names
                    .into_iter()
                    .flat_map(|name| single_row(json!({ "name": name })))
                    .collect(),
            )
        }
        (DocumentCommand::InsertOne { .. }, DocumentOutcome::Inserted(ids)) => {
            let mut summary = MutationSummary::new("Insert successful");
            summary.inserted_id = ids.into_iter().next().map(bson_to_json);
            summary.acknowledged = Some(true);
            QueryPayload::summary(summary)
        }
        (DocumentCommand::InsertMany { .. }, DocumentOutcome::Inserted(ids)) => {
            let mut summary = MutationSummary::new("Insert many successful");
            summary.inserted_count = Some(ids.len() as u64);
            summary.inserted_ids = Some(ids.into_iter().map(bson_to_json).collect());
            summary.acknowledged = Some(true);
            QueryPayload::summary(summary)
        }
        (
            DocumentCommand::UpdateOne { .. } | DocumentCommand::UpdateMany { .. },
            DocumentOutcome::Updated { matched, modified },
        ) => {
            let message = if matches!(command, DocumentCommand::UpdateOne { .. }) {
                "Update successful"
            } else {
                "Update many successful"
            };
            let mut summary = MutationSummary::new(message);
            summary.matched_count = Some(matched);
            summary.modified_count = Some(modified);
            summary.acknowledged = Some(true);
            QueryPayload::summary(summary)
        }
        (
            DocumentCommand::DeleteOne { .. } | DocumentCommand::DeleteMany { .. },
            DocumentOutcome::Deleted(deleted),
        ) => {
            let message = if matches!(command, DocumentCommand::DeleteOne { .. }) {
                "Delete successful"
            } else {
                "Delete many successful"
            };
            let mut summary = MutationSummary::new(message);
            summary.deleted_count = Some(deleted);
            summary.acknowledged = Some(true);
            QueryPayload::summary(summary)
        }
        (command, outcome) => {
            return Err(AppError::Internal(format!(
                "{} produced an unexpected outcome: {:?}",
                command.name(),
                outcome
            )))
        }
    };
    Ok(payload)
}

#[async_trait]
impl Backend for DocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn introspect(
        &self,
        credentials: &Credentials,
        tables: &[String],
    ) -> AppResult<SchemaMap> {
        let mut session = self.connector.open(credentials).await?;
        let mut schema = SchemaMap::new();

        for name in tables {
            let collection = sanitize_collection_name(name);
            let columns = if collection.is_empty() {
                tracing::warn!(collection = %name, "Collection name has no valid characters");
                Vec::new()
            } else {
                match session.sample(&collection, SAMPLE_SIZE).await {
                    Ok(samples) => {
                        tracing::debug!(collection = %collection, samples = samples.len(), "Sampled collection");
                        infer_columns(&samples)
                    }
                    Err(e) => {
                        tracing::warn!(collection = %collection, error = %e, "Failed to sample collection");
                        Vec::new()
                    }
                }
            };
            schema.insert(name.clone(), columns);
        }

        session.close().await;
        Ok(schema)
    }

    fn fallback_query(&self, natural_language: &str, tables: &[String]) -> String {
        let collection = fallback_target(tables, sanitize_collection_name);
        document_fallback(FallbackIntent::classify(natural_language), &collection, Utc::now())
    }

    async fn execute(&self, credentials: &Credentials, command: &Command) -> AppResult<QueryPayload> {
        let Command::Document(command) = command else {
            return Err(AppError::UnsupportedOperation(
                "SQL commands cannot run on a document backend".into(),
            ));
        };

        let mut session = self.connector.open(credentials).await?;
        let outcome = session.run(command).await;
        session.close().await;

        let result = outcome.and_then(|outcome| normalize_outcome(command, outcome));
        match &result {
            Ok(payload) => tracing::info!(
                operation = command.name(),
                collection = command.collection().unwrap_or("-"),
                rows = payload.row_count,
                "Document command executed"
            ),
            Err(e) => tracing::warn!(
                operation = command.name(),
                collection = command.collection().unwrap_or("-"),
                error = %e,
                "Document command failed"
            ),
        }
        result
    }

    async fn test_connection(&self, credentials: &Credentials) -> AppResult<()> {
        let mut session = self.connector.open(credentials).await?;
        let result = session.ping().await;
        session.close().await;
        result
    }

    async fn list_tables(&self, credentials: &Credentials) -> AppResult<Vec<TableItem>> {
        let mut session = self.connector.open(credentials).await?;
        let result = session.list_collections().await;
        session.close().await;
        Ok(result?
            .into_iter()
            .map(|name| TableItem {
                name,
                kind: TableKind::Collection,
            })
            .collect())
    }
}
