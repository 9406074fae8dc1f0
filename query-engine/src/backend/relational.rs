//! Relational (MySQL dialect) backend.

use std::sync::Arc;

use async_trait::async_trait;

use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, Credentials, MutationSummary, QueryPayload, SchemaMap, TableItem, TableKind,
};
use common::utils::sanitize_table_name;

use super::Backend;
use crate::connector::{SqlConnector, SqlSession};
use crate::generator::{fallback_target, relational_fallback, FallbackIntent};
use crate::grammar::{Command, SqlCommand, SqlOperation, ROW_CAP};

pub struct RelationalBackend {
    connector: Arc<dyn SqlConnector>,
}

impl RelationalBackend {
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        Self { connector }
    }
}

async fn run(session: &mut dyn SqlSession, command: &SqlCommand) -> AppResult<QueryPayload> {
    let payload = match command.operation {
        SqlOperation::Select => {
            let mut rows = session.fetch_rows(&command.statement).await?;
            rows.truncate(ROW_CAP as usize);
            QueryPayload::rows(rows)
        }
        SqlOperation::Insert => {
            let outcome = session.execute(&command.statement).await?;
            let mut summary = MutationSummary::new("Insert successful");
            summary.affected_rows = Some(outcome.rows_affected);
            summary.insert_id = Some(outcome.last_insert_id);
            QueryPayload::summary(summary)
        }
        SqlOperation::Update => {
            let outcome = session.execute(&command.statement).await?;
            let mut summary = MutationSummary::new("Update successful");
            summary.affected_rows = Some(outcome.rows_affected);
            summary.changed_rows = Some(outcome.rows_affected);
            QueryPayload::summary(summary)
        }
        SqlOperation::Delete => {
            let outcome = session.execute(&command.statement).await?;
            let mut summary = MutationSummary::new("Delete successful");
            summary.affected_rows = Some(outcome.rows_affected);
            QueryPayload::summary(summary)
        }
    };
    Ok(payload)
}

#[async_trait]
impl Backend for RelationalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn introspect(
        &self,
        credentials: &Credentials,
        tables: &[String],
    ) -> AppResult<SchemaMap> {
        let mut session = self.connector.open(credentials).await?;
        let mut schema = SchemaMap::new();

        for name in tables {
            let sanitized = sanitize_table_name(name);
            let columns = if sanitized.is_empty() {
                tracing::warn!(table = %name, "Table name has no valid characters");
                Vec::new()
            } else {
                match session.describe(&sanitized).await {
                    Ok(columns) => columns,
                    Err(e) => {
                        tracing::warn!(table = %sanitized, error = %e, "Failed to describe table");
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
        let table = fallback_target(tables, sanitize_table_name);
        relational_fallback(FallbackIntent::classify(natural_language), &table)
    }

    async fn execute(&self, credentials: &Credentials, command: &Command) -> AppResult<QueryPayload> {
        let Command::Sql(command) = command else {
            return Err(AppError::UnsupportedOperation(
                "document commands cannot run on a relational backend".into(),
            ));
        };

        let mut session = self.connector.open(credentials).await?;
        let result = run(session.as_mut(), command).await;
        session.close().await;

        match &result {
            Ok(payload) => tracing::info!(
                operation = command.operation.name(),
                table = %command.table,
                rows = payload.row_count,
                "Relational command executed"
            ),
            Err(e) => tracing::warn!(
                operation = command.operation.name(),
                table = %command.table,
                error = %e,
                "Relational command failed"
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
        let result = session.list_tables().await;
        session.close().await;
        Ok(result?
            .into_iter()
            .map(|name| TableItem {
                name,
                kind: TableKind::Table,
            })
            .collect())
    }
}
