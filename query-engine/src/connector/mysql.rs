//! MySQL connector backed by a single `sqlx` connection.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _, TypeInfo, ValueRef};

use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ColumnDescriptor, Credentials, Row};

use super::{SqlConnector, SqlOutcome, SqlSession};

/// Opens one un-pooled MySQL connection per session.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SqlConnector for MySqlConnector {
    async fn open(&self, credentials: &Credentials) -> AppResult<Box<dyn SqlSession>> {
        let port = credentials.port_or_default(BackendKind::Relational);
        let options = build_connect_options(credentials);

        let conn = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                AppError::Connection(format!(
                    "timed out connecting to {}:{} after {}s",
                    credentials.host,
                    port,
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::Connection(e.to_string()))?;

        tracing::debug!(host = %credentials.host, port, "MySQL connection opened");
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

fn exec_err(e: sqlx::Error) -> AppError {
    AppError::Execution(e.to_string())
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn describe(&mut self, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
        let sql = format!("DESCRIBE `{}`", table);
        let rows = sqlx::query(&sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(exec_err)?;

        Ok(rows
            .iter()
            .map(|row| {
                let mut column = ColumnDescriptor::new(
                    text(row, "Field").unwrap_or_default(),
                    text(row, "Type").unwrap_or_default(),
                );
                column.nullable = text(row, "Null").is_some_and(|v| v.eq_ignore_ascii_case("YES"));
                column.is_primary_key = text(row, "Key").is_some_and(|v| v == "PRI");
                column.default = text(row, "Default");
                column
            })
            .collect())
    }

    async fn fetch_rows(&mut self, statement: &str) -> AppResult<Vec<Row>> {
        let rows = sqlx::query(statement)
            .fetch_all(&mut self.conn)
            .await
            .map_err(exec_err)?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, statement: &str) -> AppResult<SqlOutcome> {
        let result = sqlx::query(statement)
            .execute(&mut self.conn)
            .await
            .map_err(exec_err)?;
        Ok(SqlOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        })
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        let rows = sqlx::query("SHOW TABLES")
            .fetch_all(&mut self.conn)
            .await
            .map_err(exec_err)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get_unchecked::<String, _>(0).ok())
            .collect())
    }

    async fn ping(&mut self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&mut self.conn)
            .await
            .map_err(|e| AppError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            tracing::warn!(error = %e, "MySQL connection did not close cleanly");
        } else {
            tracing::debug!("MySQL connection closed");
        }
    }
}

// ============== Options Builders ==============

fn build_connect_options(credentials: &Credentials) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(credentials.host.trim())
        .port(credentials.port_or_default(BackendKind::Relational))
        .disable_statement_logging();
    if let Some(username) = credentials.username.as_deref().filter(|u| !u.is_empty()) {
        options = options.username(username);
    }
    if let Some(password) = credentials.password.as_deref().filter(|p| !p.is_empty()) {
        options = options.password(password);
    }
    if let Some(database) = credentials.resolved_database(BackendKind::Relational) {
        options = options.database(&database);
    }
    options
}

// ============== Row Conversion ==============

/// Reads a textual metadata column such as `DESCRIBE`'s `Field`.
fn text(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get_unchecked::<Option<String>, _>(column)
        .ok()
        .flatten()
}

fn row_to_json(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|col| {
            let value = cell_to_json(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), value)
        })
        .collect()
}

fn cell_to_json(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let decoded = match type_name {
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(index).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get_unchecked::<i64, _>(index).map(Value::from)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get_unchecked::<u64, _>(index).map(Value::from),
        "FLOAT" => row
            .try_get_unchecked::<f32, _>(index)
            .map(|v| Value::from(f64::from(v))),
        "DOUBLE" => row.try_get_unchecked::<f64, _>(index).map(Value::from),
        "DATETIME" => row
            .try_get_unchecked::<NaiveDateTime, _>(index)
            .map(|v| Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string())),
        "TIMESTAMP" => row
            .try_get_unchecked::<DateTime<Utc>, _>(index)
            .map(|v| Value::String(v.to_rfc3339())),
        "DATE" => row
            .try_get_unchecked::<NaiveDate, _>(index)
            .map(|v| Value::String(v.to_string())),
        "TIME" => row
            .try_get_unchecked::<NaiveTime, _>(index)
            .map(|v| Value::String(v.to_string())),
        "JSON" => row.try_get_unchecked::<Value, _>(index),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|v| Value::String(String::from_utf8_lossy(&v).into_owned())),
        // DECIMAL, text types, ENUM, SET and anything unknown.
        _ => row.try_get_unchecked::<String, _>(index).map(Value::String),
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!(column = index, type_name, error = %e, "Undecodable cell returned as null");
        Value::Null
    })
}
