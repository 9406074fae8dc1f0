//! # Engine Tests
//!
//! Drives `QueryEngine` end to end over in-memory connectors and a scripted
//! language model. The stubs count opened and closed sessions so connection
//! release can be checked on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use serde_json::json;

use common::errors::{AppError, AppResult, ErrorCode};
use common::models::{ColumnDescriptor, Credentials, GenerationSource, Row, BackendKind};
use query_engine::connector::{
    DocumentConnector, DocumentOutcome, DocumentSession, SqlConnector, SqlOutcome, SqlSession,
};
use query_engine::grammar::DocumentCommand;
use query_engine::{
    DocumentBackend, GeminiClient, Generator, LanguageModel, ProviderError, QueryEngine,
    RelationalBackend,
};

// --- Session bookkeeping ---

#[derive(Default)]
struct Ledger {
    opened: AtomicUsize,
    closed: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

impl Ledger {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

// --- Relational stub ---

#[derive(Clone, Default)]
struct SqlScript {
    refuse_connection: bool,
    fail_statements: bool,
    rows: Vec<Row>,
    tables: HashMap<String, Vec<ColumnDescriptor>>,
}

struct StubSqlConnector {
    ledger: Arc<Ledger>,
    script: SqlScript,
}

struct StubSqlSession {
    ledger: Arc<Ledger>,
    script: SqlScript,
}

#[async_trait]
impl SqlConnector for StubSqlConnector {
    async fn open(&self, _credentials: &Credentials) -> AppResult<Box<dyn SqlSession>> {
        if self.script.refuse_connection {
            return Err(AppError::Connection("connection refused".into()));
        }
        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSqlSession {
            ledger: self.ledger.clone(),
            script: self.script.clone(),
        }))
    }
}

#[async_trait]
impl SqlSession for StubSqlSession {
    async fn describe(&mut self, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
        self.script
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| AppError::Execution(format!("Table '{}' doesn't exist", table)))
    }

    async fn fetch_rows(&mut self, statement: &str) -> AppResult<Vec<Row>> {
        self.ledger.statements.lock().unwrap().push(statement.to_string());
        if self.script.fail_statements {
            return Err(AppError::Execution("Lost connection to MySQL server during query".into()));
        }
        Ok(self.script.rows.clone())
    }

    async fn execute(&mut self, statement: &str) -> AppResult<SqlOutcome> {
        self.ledger.statements.lock().unwrap().push(statement.to_string());
        if self.script.fail_statements {
            return Err(AppError::Execution("Duplicate entry '1' for key 'PRIMARY'".into()));
        }
        Ok(SqlOutcome {
            rows_affected: 2,
            last_insert_id: 41,
        })
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        let mut names: Vec<String> = self.script.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn ping(&mut self) -> AppResult<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Document stub ---

#[derive(Clone, Default)]
struct DocScript {
    fail_commands: bool,
    collections: HashMap<String, Vec<Document>>,
}

struct StubDocConnector {
    ledger: Arc<Ledger>,
    script: DocScript,
}

struct StubDocSession {
    ledger: Arc<Ledger>,
    script: DocScript,
}

#[async_trait]
impl DocumentConnector for StubDocConnector {
    async fn open(&self, _credentials: &Credentials) -> AppResult<Box<dyn DocumentSession>> {
        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubDocSession {
            ledger: self.ledger.clone(),
            script: self.script.clone(),
        }))
    }
}

#[async_trait]
impl DocumentSession for StubDocSession {
    async fn sample(&mut self, collection: &str, limit: i64) -> AppResult<Vec<Document>> {
        let docs = self.script.collections.get(collection).cloned().unwrap_or_default();
        Ok(docs.into_iter().take(limit as usize).collect())
    }

    async fn run(&mut self, command: &DocumentCommand) -> AppResult<DocumentOutcome> {
        self.ledger.statements.lock().unwrap().push(command.to_string());
        if self.script.fail_commands {
            return Err(AppError::Execution("unknown operator: $bogus".into()));
        }
        let docs = command
            .collection()
            .and_then(|c| self.script.collections.get(c).cloned())
            .unwrap_or_default();
        Ok(match command {
            DocumentCommand::Find { limit, .. } => {
                DocumentOutcome::Documents(docs.into_iter().take(*limit as usize).collect())
            }
            DocumentCommand::CountDocuments { .. } => DocumentOutcome::Count(docs.len() as u64),
            DocumentCommand::DeleteOne { .. } | DocumentCommand::DeleteMany { .. } => {
                DocumentOutcome::Deleted(1)
            }
            DocumentCommand::ShowCollections => {
                DocumentOutcome::Collections(self.script.collections.keys().cloned().collect())
            }
            other => panic!("stub does not script {}", other.name()),
        })
    }

    async fn list_collections(&mut self) -> AppResult<Vec<String>> {
        Ok(self.script.collections.keys().cloned().collect())
    }

    async fn ping(&mut self) -> AppResult<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Scripted model ---

enum Reply {
    Text(&'static str),
    Fail,
    Hang,
}

struct ScriptedModel {
    reply: Reply,
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate_content(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Fail => Err(ProviderError::Api {
                status: 403,
                body: "API key not valid".into(),
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("SELECT * FROM never LIMIT 1;".into())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// --- Harness ---

struct Harness {
    engine: QueryEngine,
    sql: Arc<Ledger>,
    docs: Arc<Ledger>,
}

fn customers_table() -> HashMap<String, Vec<ColumnDescriptor>> {
    let mut id = ColumnDescriptor::new("id", "int");
    id.nullable = false;
    id.is_primary_key = true;
    HashMap::from([(
        "customers".to_string(),
        vec![id, ColumnDescriptor::new("email", "varchar(255)")],
    )])
}

fn harness(sql: SqlScript, docs: DocScript, model: Option<Reply>) -> Harness {
    let sql_ledger = Arc::new(Ledger::default());
    let doc_ledger = Arc::new(Ledger::default());
    let model: Option<Arc<dyn LanguageModel>> = model.map(|reply| {
        Arc::new(ScriptedModel {
            reply,
            calls: AtomicUsize::new(0),
        }) as Arc<dyn LanguageModel>
    });

    let engine = QueryEngine::new(
        Arc::new(RelationalBackend::new(Arc::new(StubSqlConnector {
            ledger: sql_ledger.clone(),
            script: sql,
        }))),
        Arc::new(DocumentBackend::new(Arc::new(StubDocConnector {
            ledger: doc_ledger.clone(),
            script: docs,
        }))),
        Generator::new(model, Duration::from_millis(100)),
    );
    Harness {
        engine,
        sql: sql_ledger,
        docs: doc_ledger,
    }
}

fn creds() -> Credentials {
    Credentials::new("localhost")
}

fn tables(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// --- Generation ---

#[tokio::test]
async fn test_fallback_without_model() {
    let h = harness(SqlScript::default(), DocScript::default(), None);
    let resp = h
        .engine
        .generate_query(BackendKind::Relational, &creds(), "show all users", &tables(&["customers"]))
        .await;

    assert!(resp.success);
    let generated = resp.data.unwrap();
    assert_eq!(generated.query, "SELECT * FROM customers LIMIT 100;");
    assert_eq!(generated.operation, "select");
    assert_eq!(generated.source, GenerationSource::Fallback);
    assert_eq!(h.sql.opened(), 0, "no schema fetch without a model");
}

#[tokio::test]
async fn test_fallback_accepts_reserved_and_numeric_table_names() {
    let h = harness(SqlScript::default(), DocScript::default(), None);
    for (table, expected) in [
        ("2024_sales", "SELECT * FROM `2024_sales` LIMIT 100;"),
        ("lock", "SELECT * FROM `lock` LIMIT 100;"),
    ] {
        let resp = h
            .engine
            .generate_query(BackendKind::Relational, &creds(), "show all rows", &tables(&[table]))
            .await;
        assert!(resp.success, "{:?}", resp.error);
        assert_eq!(resp.data.unwrap().query, expected);
    }
}

#[tokio::test]
async fn test_model_output_is_cleaned_and_capped() {
    let h = harness(
        SqlScript {
            tables: customers_table(),
            ..Default::default()
        },
        DocScript::default(),
        Some(Reply::Text("```sql\nSELECT email FROM customers LIMIT 500;\n```")),
    );
    let resp = h
        .engine
        .generate_query(BackendKind::Relational, &creds(), "emails", &tables(&["customers"]))
        .await;

    let generated = resp.data.unwrap();
    assert_eq!(generated.query, "SELECT email FROM customers LIMIT 100;");
    assert_eq!(generated.source, GenerationSource::Model);
    assert!(generated.fallback_reason.is_none());
    assert_eq!(h.sql.opened(), 1);
    assert_eq!(h.sql.closed(), 1);
}

#[tokio::test]
async fn test_unsafe_model_output_falls_back() {
    let h = harness(
        SqlScript::default(),
        DocScript::default(),
        Some(Reply::Text("DELETE FROM customers")),
    );
    let resp = h
        .engine
        .generate_query(BackendKind::Relational, &creds(), "count customers", &tables(&["customers"]))
        .await;

    let generated = resp.data.unwrap();
    assert_eq!(generated.source, GenerationSource::Fallback);
    assert_eq!(generated.operation, "select");
    assert!(generated.query.starts_with("SELECT COUNT(*) AS total_count FROM customers"));
    assert!(generated
        .fallback_reason
        .unwrap()
        .contains("model output rejected"));
}

#[tokio::test]
async fn test_provider_failure_and_timeout_fall_back() {
    for reply in [Reply::Fail, Reply::Hang] {
        let h = harness(SqlScript::default(), DocScript::default(), Some(reply));
        let resp = h
            .engine
            .generate_query(BackendKind::Document, &creds(), "latest orders", &tables(&["orders"]))
            .await;

        assert!(resp.success);
        let generated = resp.data.unwrap();
        assert_eq!(generated.source, GenerationSource::Fallback);
        assert_eq!(
            generated.query,
            "db.orders.find({}).sort({\"createdAt\": -1}).limit(10)"
        );
    }
}

#[tokio::test]
async fn test_unreachable_backend_does_not_block_generation() {
    let h = harness(
        SqlScript {
            refuse_connection: true,
            ..Default::default()
        },
        DocScript::default(),
        Some(Reply::Text("SELECT * FROM customers WHERE id = 1")),
    );
    let resp = h
        .engine
        .generate_query(BackendKind::Relational, &creds(), "customer 1", &tables(&["customers"]))
        .await;

    assert_eq!(resp.data.unwrap().source, GenerationSource::Model);
}

#[tokio::test]
async fn test_unreachable_model_reason_hides_api_key() {
    let sql_ledger = Arc::new(Ledger::default());
    let model = GeminiClient::new(
        "http://127.0.0.1:1/v1beta/models/m:generateContent",
        "SUPERSECRETKEY",
        "m",
    )
    .unwrap();
    let engine = QueryEngine::new(
        Arc::new(RelationalBackend::new(Arc::new(StubSqlConnector {
            ledger: sql_ledger.clone(),
            script: SqlScript::default(),
        }))),
        Arc::new(DocumentBackend::new(Arc::new(StubDocConnector {
            ledger: Arc::new(Ledger::default()),
            script: DocScript::default(),
        }))),
        Generator::new(Some(Arc::new(model)), Duration::from_secs(5)),
    );

    let resp = engine
        .generate_query(BackendKind::Relational, &creds(), "show all rows", &[])
        .await;
    let wire = serde_json::to_string(&resp).unwrap();
    assert!(!wire.contains("SUPERSECRETKEY"), "{}", wire);

    let generated = resp.data.unwrap();
    assert_eq!(generated.source, GenerationSource::Fallback);
    assert!(generated.fallback_reason.unwrap().contains("model request failed"));
}

// --- Introspection ---

#[tokio::test]
async fn test_relational_schema_isolates_table_failures() {
    let h = harness(
        SqlScript {
            tables: customers_table(),
            ..Default::default()
        },
        DocScript::default(),
        None,
    );
    let resp = h
        .engine
        .build_schema(BackendKind::Relational, &creds(), &tables(&["customers", "missing"]))
        .await;

    assert!(resp.success);
    let schema = resp.data.unwrap();
    assert_eq!(schema["customers"].len(), 2);
    assert!(schema["customers"][0].is_primary_key);
    assert!(schema["missing"].is_empty());
    assert_eq!(h.sql.opened(), 1);
    assert_eq!(h.sql.closed(), 1);
}

#[tokio::test]
async fn test_connection_error_is_enveloped() {
    let h = harness(
        SqlScript {
            refuse_connection: true,
            ..Default::default()
        },
        DocScript::default(),
        None,
    );
    let resp = h
        .engine
        .build_schema(BackendKind::Relational, &creds(), &tables(&["customers"]))
        .await;

    assert!(!resp.success);
    assert_eq!(resp.code, Some(ErrorCode::ConnectionError));
    assert!(resp.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_document_schema_inference() {
    let docs = DocScript {
        collections: HashMap::from([(
            "people".to_string(),
            vec![
                doc! {"name": "a", "age": 30},
                doc! {"name": "b"},
                doc! {"name": "c", "age": 41},
            ],
        )]),
        ..Default::default()
    };
    let h = harness(SqlScript::default(), docs, None);
    let resp = h
        .engine
        .build_schema(BackendKind::Document, &creds(), &tables(&["people", "empty"]))
        .await;

    let schema = resp.data.unwrap();
    let age = schema["people"].iter().find(|c| c.name == "age").unwrap();
    assert_eq!(age.data_type, "number");
    assert!(age.nullable);
    assert!(schema["empty"].is_empty());
    assert_eq!(h.docs.closed(), 1);
}

#[tokio::test]
async fn test_dotted_collection_is_sampled_and_queried() {
    let docs = DocScript {
        collections: HashMap::from([(
            "logs.2024".to_string(),
            vec![doc! {"level": "error", "code": 500}],
        )]),
        ..Default::default()
    };
    let h = harness(SqlScript::default(), docs, None);
    let selected = tables(&["logs.2024"]);

    let schema = h
        .engine
        .build_schema(BackendKind::Document, &creds(), &selected)
        .await
        .data
        .unwrap();
    assert!(schema["logs.2024"].iter().any(|c| c.name == "level"));

    let generated = h
        .engine
        .generate_query(BackendKind::Document, &creds(), "show all logs", &selected)
        .await
        .data
        .unwrap();
    assert_eq!(
        generated.query,
        "db.getCollection(\"logs.2024\").find({}).limit(100)"
    );

    let resp = h
        .engine
        .execute_query(BackendKind::Document, &creds(), &generated.query)
        .await;
    assert_eq!(resp.data.unwrap().row_count, 1);
}

// --- Execution ---

#[tokio::test]
async fn test_driver_fault_still_closes_connection() {
    let h = harness(
        SqlScript {
            fail_statements: true,
            ..Default::default()
        },
        DocScript {
            fail_commands: true,
            ..Default::default()
        },
        None,
    );

    let resp = h
        .engine
        .execute_query(BackendKind::Relational, &creds(), "INSERT INTO t (id) VALUES (1)")
        .await;
    assert!(!resp.success);
    assert_eq!(resp.code, Some(ErrorCode::ExecutionError));
    assert_eq!(h.sql.opened(), 1);
    assert_eq!(h.sql.closed(), 1);

    let resp = h
        .engine
        .execute_query(BackendKind::Document, &creds(), "db.t.find({a: {$bogus: 1}})")
        .await;
    assert!(!resp.success);
    assert_eq!(h.docs.opened(), 1);
    assert_eq!(h.docs.closed(), 1);
}

#[tokio::test]
async fn test_rejected_text_never_opens_a_connection() {
    let h = harness(SqlScript::default(), DocScript::default(), None);

    let cases = [
        (BackendKind::Relational, "UPDATE users SET name='x'", ErrorCode::UnsafeMutation),
        (BackendKind::Relational, "DROP TABLE users", ErrorCode::UnsupportedOperation),
        (BackendKind::Document, "db.users.deleteMany()", ErrorCode::UnsafeMutation),
        (
            BackendKind::Document,
            "db.users.insertOne({name: require('fs')})",
            ErrorCode::MalformedArguments,
        ),
    ];
    for (kind, text, code) in cases {
        let resp = h.engine.execute_query(kind, &creds(), text).await;
        assert!(!resp.success, "{}", text);
        assert_eq!(resp.code, Some(code), "{}", text);
    }
    assert_eq!(h.sql.opened() + h.docs.opened(), 0);
}

#[tokio::test]
async fn test_select_limit_is_rewritten_before_execution() {
    let rows: Vec<Row> = (0..3)
        .map(|i| json!({"id": i}).as_object().cloned().unwrap())
        .collect();
    let h = harness(
        SqlScript {
            rows,
            ..Default::default()
        },
        DocScript::default(),
        None,
    );
    let resp = h
        .engine
        .execute_query(BackendKind::Relational, &creds(), "SELECT id FROM t LIMIT 500")
        .await;

    assert!(resp.success);
    assert_eq!(resp.data.unwrap().row_count, 3);
    assert_eq!(h.sql.statements(), vec!["SELECT id FROM t LIMIT 100".to_string()]);
}

#[tokio::test]
async fn test_relational_mutation_summaries() {
    let h = harness(SqlScript::default(), DocScript::default(), None);

    let resp = h
        .engine
        .execute_query(BackendKind::Relational, &creds(), "INSERT INTO t (a) VALUES (1), (2);")
        .await;
    let summary = resp.data.unwrap().summary.unwrap();
    assert_eq!(summary.message, "Insert successful");
    assert_eq!(summary.affected_rows, Some(2));
    assert_eq!(summary.insert_id, Some(41));

    let resp = h
        .engine
        .execute_query(BackendKind::Relational, &creds(), "UPDATE t SET a = 2 WHERE a = 1")
        .await;
    let summary = resp.data.unwrap().summary.unwrap();
    assert_eq!(summary.message, "Update successful");
    assert_eq!(summary.changed_rows, Some(2));
}

#[tokio::test]
async fn test_document_count_and_delete() {
    let docs = DocScript {
        collections: HashMap::from([(
            "users".to_string(),
            vec![doc! {"a": 1}, doc! {"a": 2}, doc! {"a": 3}],
        )]),
        ..Default::default()
    };
    let h = harness(SqlScript::default(), docs, None);

    let resp = h
        .engine
        .execute_query(BackendKind::Document, &creds(), "db.users.countDocuments({})")
        .await;
    let payload = resp.data.unwrap();
    assert_eq!(serde_json::to_value(payload.rows.unwrap()).unwrap(), json!([{"count": 3}]));

    let resp = h
        .engine
        .execute_query(
            BackendKind::Document,
            &creds(),
            "db.users.deleteMany({status: \"inactive\"})",
        )
        .await;
    let summary = resp.data.unwrap().summary.unwrap();
    assert_eq!(summary.deleted_count, Some(1));
    assert_eq!(summary.acknowledged, Some(true));
    assert_eq!(h.docs.opened(), h.docs.closed());
}

#[tokio::test]
async fn test_generated_query_executes() {
    let h = harness(SqlScript::default(), DocScript::default(), None);
    let generated = h
        .engine
        .generate_query(BackendKind::Document, &creds(), "recent signups", &tables(&["users"]))
        .await
        .data
        .unwrap();

    let resp = h
        .engine
        .execute_query(BackendKind::Document, &creds(), &generated.query)
        .await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(h.docs.statements(), vec![generated.query]);
}

// --- Supplemental operations ---

#[tokio::test]
async fn test_list_tables_and_connection_check() {
    let h = harness(
        SqlScript {
            tables: customers_table(),
            ..Default::default()
        },
        DocScript::default(),
        None,
    );

    let resp = h.engine.list_tables(BackendKind::Relational, &creds()).await;
    let items = resp.data.unwrap();
    assert_eq!(serde_json::to_value(&items).unwrap(), json!([{"name": "customers", "type": "table"}]));

    let resp = h.engine.test_connection(BackendKind::Relational, &creds()).await;
    assert!(resp.success);
    assert_eq!(h.sql.opened(), 2);
    assert_eq!(h.sql.closed(), 2);
}

#[tokio::test]
async fn test_probe_model() {
    let h = harness(SqlScript::default(), DocScript::default(), None);
    let probe = h.engine.probe_model().await.data.unwrap();
    assert!(!probe.configured);
    assert!(probe.response.is_none());

    let h = harness(
        SqlScript::default(),
        DocScript::default(),
        Some(Reply::Text("SELECT * FROM users;")),
    );
    let probe = h.engine.probe_model().await.data.unwrap();
    assert!(probe.configured);
    assert_eq!(probe.response.as_deref(), Some("SELECT * FROM users;"));
}
