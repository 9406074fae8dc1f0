//! Query generation with keyword fallback.
//!
//! The model is asked first. Any failure (no model configured, provider
//! error, timeout, output that does not parse) switches to a deterministic
//! keyword generator whose output always satisfies the grammar.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use common::errors::{AppError, AppResult};
use common::models::{GeneratedQuery, GenerationSource, SchemaMap};

use crate::backend::Backend;
use crate::grammar::mongo::collection_ref;
use crate::grammar::sql::quote_identifier;
use crate::grammar::{Command, ROW_CAP};
use crate::llm::{LanguageModel, ProviderError};

/// Table used by the fallback when none is selected.
pub const DEFAULT_FALLBACK_TABLE: &str = "users";

/// Conventional timestamp column/field per dialect.
const RELATIONAL_TIMESTAMP: &str = "created_at";
const DOCUMENT_TIMESTAMP: &str = "createdAt";

/// Rows returned by the "latest" and default fallback reads.
const SHORT_LIMIT: u64 = 10;

/// Strips Markdown fences and a leading `Query:` label.
pub fn clean_model_output(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    for fence in ["```sql", "```mysql", "```mongodb", "```javascript", "```js", "```"] {
        text = text.replace(fence, "");
    }
    let text = text.trim();
    let text = match text.get(..6) {
        Some(label) if label.eq_ignore_ascii_case("query:") => &text[6..],
        _ => text,
    };
    text.trim().to_string()
}

/// What the keyword fallback decided the user wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackIntent {
    All,
    Count,
    Recent,
    Latest,
    Sample,
}

impl FallbackIntent {
    /// Keyword match over the lowercased request, first rule wins.
    pub fn classify(natural_language: &str) -> Self {
        let lower = natural_language.to_lowercase();
        if lower.contains("all") {
            FallbackIntent::All
        } else if lower.contains("count") {
            FallbackIntent::Count
        } else if lower.contains("recent") || lower.contains("last month") {
            FallbackIntent::Recent
        } else if lower.contains("latest") || lower.contains("newest") {
            FallbackIntent::Latest
        } else {
            FallbackIntent::Sample
        }
    }
}

/// First selected table reduced by `sanitize`, or `users`.
pub fn fallback_target(tables: &[String], sanitize: fn(&str) -> String) -> String {
    tables
        .first()
        .map(|t| sanitize(t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_FALLBACK_TABLE.to_string())
}

/// Relational fallback text for an already sanitized table.
///
/// Reserved or digit-leading names are backtick-quoted.
pub fn relational_fallback(intent: FallbackIntent, table: &str) -> String {
    let table = &quote_identifier(table);
    let ts = RELATIONAL_TIMESTAMP;
    match intent {
        FallbackIntent::All => format!("SELECT * FROM {} LIMIT {};", table, ROW_CAP),
        FallbackIntent::Count => format!("SELECT COUNT(*) AS total_count FROM {};", table),
        FallbackIntent::Recent => format!(
            "SELECT * FROM {t} WHERE {ts} >= DATE_SUB(NOW(), INTERVAL 1 MONTH) ORDER BY {ts} DESC LIMIT {cap};",
            t = table,
            ts = ts,
            cap = ROW_CAP
        ),
        FallbackIntent::Latest => format!(
            "SELECT * FROM {} ORDER BY {} DESC LIMIT {};",
            table, ts, SHORT_LIMIT
        ),
        FallbackIntent::Sample => format!("SELECT * FROM {} LIMIT {};", table, SHORT_LIMIT),
    }
}

/// Document fallback text for an already sanitized collection.
///
/// `now` anchors the thirty-day window of the "recent" read. Dotted names are
/// addressed through `getCollection`.
pub fn document_fallback(intent: FallbackIntent, collection: &str, now: DateTime<Utc>) -> String {
    let collection = &collection_ref(collection);
    let ts = DOCUMENT_TIMESTAMP;
    match intent {
        FallbackIntent::All => format!("db.{}.find({{}}).limit({})", collection, ROW_CAP),
        FallbackIntent::Count => format!("db.{}.countDocuments({{}})", collection),
        FallbackIntent::Recent => {
            let since = (now - chrono::Duration::days(30)).to_rfc3339_opts(SecondsFormat::Millis, true);
            format!(
                "db.{c}.find({{\"{ts}\": {{\"$gte\": ISODate(\"{since}\")}}}}).sort({{\"{ts}\": -1}}).limit({cap})",
                c = collection,
                ts = ts,
                since = since,
                cap = ROW_CAP
            )
        }
        FallbackIntent::Latest => format!(
            "db.{c}.find({{}}).sort({{\"{ts}\": -1}}).limit({n})",
            c = collection,
            ts = ts,
            n = SHORT_LIMIT
        ),
        FallbackIntent::Sample => format!("db.{}.find({{}}).limit({})", collection, SHORT_LIMIT),
    }
}

/// A validated command and where it came from.
#[derive(Debug, Clone)]
pub struct Generation {
    pub command: Command,
    pub source: GenerationSource,
    pub fallback_reason: Option<String>,
}

impl Generation {
    pub fn into_generated_query(self) -> GeneratedQuery {
        GeneratedQuery {
            query: self.command.to_string(),
            backend: self.command.backend_kind(),
            operation: self.command.operation().to_string(),
            source: self.source,
            fallback_reason: self.fallback_reason,
        }
    }
}

/// Turns natural language into a validated [`Command`].
#[derive(Clone)]
pub struct Generator {
    model: Option<Arc<dyn LanguageModel>>,
    timeout: Duration,
}

impl Generator {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn model(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.model.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Generates a command for `backend`.
    ///
    /// Fails only with `UnsupportedOperation`, when even the fallback text
    /// is rejected by the grammar.
    pub async fn generate(
        &self,
        backend: &dyn Backend,
        natural_language: &str,
        tables: &[String],
        schema: &SchemaMap,
    ) -> AppResult<Generation> {
        let reason = match self
            .from_model(backend, natural_language, tables, schema)
            .await
        {
            Ok(command) => {
                tracing::info!(
                    backend = %backend.kind(),
                    operation = command.operation(),
                    "Model query accepted"
                );
                return Ok(Generation {
                    command,
                    source: GenerationSource::Model,
                    fallback_reason: None,
                });
            }
            Err(reason) => reason,
        };

        tracing::warn!(backend = %backend.kind(), reason = %reason, "Using keyword fallback");
        let text = backend.fallback_query(natural_language, tables);
        let command = backend.parse_command(&text).map_err(|e| {
            tracing::error!(query = %text, error = %e, "Fallback query rejected");
            AppError::UnsupportedOperation(format!("fallback query rejected: {}", e))
        })?;

        Ok(Generation {
            command,
            source: GenerationSource::Fallback,
            fallback_reason: Some(reason),
        })
    }

    /// Model path; the error is the reason the fallback is taken.
    async fn from_model(
        &self,
        backend: &dyn Backend,
        natural_language: &str,
        tables: &[String],
        schema: &SchemaMap,
    ) -> Result<Command, String> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| "no language model configured".to_string())?;

        let prompt = backend.build_prompt(natural_language, tables, schema);
        tracing::debug!(model = model.name(), prompt_chars = prompt.len(), "Invoking language model");

        let raw = match tokio::time::timeout(self.timeout, model.generate_content(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(ProviderError::Timeout(self.timeout.as_secs()).to_string()),
        };

        let cleaned = clean_model_output(&raw);
        backend.parse_command(&cleaned).map_err(|e| {
            tracing::info!(query = %cleaned, error = %e, "Model output rejected by grammar");
            format!("model output rejected: {}", e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::models::BackendKind;
    use common::utils::{sanitize_collection_name, sanitize_table_name};

    use crate::grammar::parse_command;

    #[test]
    fn test_clean_model_output() {
        assert_eq!(
            clean_model_output("```sql\nSELECT * FROM users LIMIT 5;\n```"),
            "SELECT * FROM users LIMIT 5;"
        );
        assert_eq!(
            clean_model_output("  Query: db.users.find({})  "),
            "db.users.find({})"
        );
        assert_eq!(clean_model_output("```mongodb\ndb.a.find()\n```"), "db.a.find()");
        assert_eq!(clean_model_output("QUERY:SELECT 1 FROM t"), "SELECT 1 FROM t");
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(FallbackIntent::classify("show all users"), FallbackIntent::All);
        assert_eq!(FallbackIntent::classify("Count ALL orders"), FallbackIntent::All);
        assert_eq!(FallbackIntent::classify("count orders"), FallbackIntent::Count);
        assert_eq!(FallbackIntent::classify("orders from last month"), FallbackIntent::Recent);
        assert_eq!(FallbackIntent::classify("newest signups"), FallbackIntent::Latest);
        assert_eq!(FallbackIntent::classify("something"), FallbackIntent::Sample);
    }

    #[test]
    fn test_show_all_relational() {
        let table = fallback_target(&["customers".to_string()], sanitize_table_name);
        assert_eq!(
            relational_fallback(FallbackIntent::classify("show all users"), &table),
            "SELECT * FROM customers LIMIT 100;"
        );
    }

    #[test]
    fn test_fallback_target_defaults_and_sanitizes() {
        assert_eq!(fallback_target(&[], sanitize_table_name), "users");
        assert_eq!(fallback_target(&["`;--".to_string()], sanitize_table_name), "users");
        assert_eq!(
            fallback_target(&["audit-log".to_string()], sanitize_collection_name),
            "audit-log"
        );
    }

    const INTENTS: [FallbackIntent; 5] = [
        FallbackIntent::All,
        FallbackIntent::Count,
        FallbackIntent::Recent,
        FallbackIntent::Latest,
        FallbackIntent::Sample,
    ];

    #[test]
    fn test_fallback_targets_dotted_collection() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let collection = fallback_target(&["logs.2024".to_string()], sanitize_collection_name);
        assert_eq!(collection, "logs.2024");
        for intent in INTENTS {
            let text = document_fallback(intent, &collection, now);
            let parsed = parse_command(BackendKind::Document, &text).unwrap();
            let Command::Document(cmd) = parsed else {
                panic!("expected a document command for {}", text);
            };
            assert_eq!(cmd.collection(), Some("logs.2024"), "{}", text);
        }
        assert_eq!(
            document_fallback(FallbackIntent::Count, &collection, now),
            "db.getCollection(\"logs.2024\").countDocuments({})"
        );
    }

    #[test]
    fn test_fallback_parses_for_awkward_table_names() {
        for name in ["2024_sales", "lock", "order", "from", "for", "into", "procedure", "Values"] {
            let table = fallback_target(&[name.to_string()], sanitize_table_name);
            for intent in INTENTS {
                let sql = relational_fallback(intent, &table);
                let parsed = parse_command(BackendKind::Relational, &sql);
                assert!(parsed.is_ok(), "{} -> {:?}", sql, parsed);
            }
        }
        assert_eq!(
            relational_fallback(FallbackIntent::All, "lock"),
            "SELECT * FROM `lock` LIMIT 100;"
        );
    }

    #[test]
    fn test_every_fallback_parses() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        for intent in [
            FallbackIntent::All,
            FallbackIntent::Count,
            FallbackIntent::Recent,
            FallbackIntent::Latest,
            FallbackIntent::Sample,
        ] {
            let sql = relational_fallback(intent, "orders");
            assert!(parse_command(BackendKind::Relational, &sql).is_ok(), "{}", sql);
            let mongo = document_fallback(intent, "orders", now);
            assert!(parse_command(BackendKind::Document, &mongo).is_ok(), "{}", mongo);
        }
        assert_eq!(
            document_fallback(FallbackIntent::Recent, "orders", now),
            "db.orders.find({\"createdAt\": {\"$gte\": ISODate(\"2024-03-01T12:00:00.000Z\")}}).sort({\"createdAt\": -1}).limit(100)"
        );
    }
}
