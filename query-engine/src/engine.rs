//! 查询引擎门面
//!
//! 对外的每个操作都返回 [`ApiResponse`] 信封；错误折叠进信封，
//! 不会以 `Err` 的形式抛给调用方。

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, Credentials, GeneratedQuery, SchemaMap, TableItem};
use common::response::{ApiResponse, ResultEnvelope};

use crate::backend::{Backend, DocumentBackend, RelationalBackend};
use crate::connector::{MongoConnector, MySqlConnector};
use crate::generator::Generator;
use crate::llm::{GeminiClient, LanguageModel};

/// [`QueryEngine::probe_model`] 发送的测试提示词
pub const PROBE_PROMPT: &str =
    "Generate a simple MySQL query to select all users. Respond with only the SQL query.";

/// 连接测试结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub backend: BackendKind,
    pub latency_ms: u64,
}

/// 大模型连通性测试结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelProbe {
    /// 是否配置了 API 密钥
    pub configured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

fn envelope<T>(result: AppResult<T>, started: Instant) -> ApiResponse<T> {
    ApiResponse::from_result(result).with_duration(started.elapsed().as_millis() as u64)
}

/// 查询引擎
///
/// 持有关系型与文档型两个后端以及查询生成器，负责结构获取、
/// 查询生成和查询执行。
pub struct QueryEngine {
    relational: Arc<dyn Backend>,
    document: Arc<dyn Backend>,
    generator: Generator,
}

impl QueryEngine {
    /// 由已构建的后端和生成器组装引擎
    pub fn new(relational: Arc<dyn Backend>, document: Arc<dyn Backend>, generator: Generator) -> Self {
        Self {
            relational,
            document,
            generator,
        }
    }

    /// 根据配置创建引擎
    ///
    /// 使用真实的 MySQL / MongoDB 驱动；配置了密钥时接入 Gemini 客户端，
    /// 否则只使用关键字兜底生成。
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = config.connect_timeout();
        let relational = Arc::new(RelationalBackend::new(Arc::new(MySqlConnector::new(timeout))));
        let document = Arc::new(DocumentBackend::new(Arc::new(MongoConnector::new(timeout))));

        let model: Option<Arc<dyn LanguageModel>> = match GeminiClient::from_config(&config.llm) {
            Ok(Some(client)) => {
                tracing::info!(model = %config.llm.model, "Language model configured");
                Some(Arc::new(client))
            }
            Ok(None) => {
                tracing::warn!("GEMINI_API_KEY not set, generation will use the keyword fallback");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build model client, using keyword fallback");
                None
            }
        };

        Self::new(relational, document, Generator::new(model, config.llm.timeout()))
    }

    /// 获取指定类型的后端
    pub fn backend(&self, kind: BackendKind) -> &dyn Backend {
        match kind {
            BackendKind::Relational => self.relational.as_ref(),
            BackendKind::Document => self.document.as_ref(),
        }
    }

    /// 获取所选表/集合的结构
    ///
    /// 每次调用使用新的连接，单个表失败时其列为空，不影响其他表。
    pub async fn build_schema(
        &self,
        kind: BackendKind,
        credentials: &Credentials,
        tables: &[String],
    ) -> ApiResponse<SchemaMap> {
        let started = Instant::now();
        let result = self.backend(kind).introspect(credentials, tables).await;
        if let Ok(schema) = &result {
            tracing::info!(backend = %kind, tables = schema.len(), "Schema built");
        }
        envelope(result, started)
    }

    /// 生成经过校验的查询（仅生成，不执行）
    ///
    /// 只有在会调用大模型时才获取结构；结构获取失败只会让提示词缺少结构信息，
    /// 请求本身不会失败。
    pub async fn generate_query(
        &self,
        kind: BackendKind,
        credentials: &Credentials,
        natural_language: &str,
        tables: &[String],
    ) -> ApiResponse<GeneratedQuery> {
        let started = Instant::now();
        let backend = self.backend(kind);

        let schema = if self.generator.model().is_some() && !tables.is_empty() {
            match backend.introspect(credentials, tables).await {
                Ok(schema) => schema,
                Err(e) => {
                    tracing::warn!(backend = %kind, error = %e, "Schema unavailable for prompt");
                    SchemaMap::new()
                }
            }
        } else {
            SchemaMap::new()
        };

        let result = self
            .generator
            .generate(backend, natural_language, tables, &schema)
            .await
            .map(|generation| generation.into_generated_query());
        envelope(result, started)
    }

    /// 校验并执行查询文本
    ///
    /// 未通过语法校验的文本直接返回错误，不会打开数据库连接。
    pub async fn execute_query(
        &self,
        kind: BackendKind,
        credentials: &Credentials,
        text: &str,
    ) -> ResultEnvelope {
        let started = Instant::now();
        let backend = self.backend(kind);
        let result = match backend.parse_command(text) {
            Ok(command) => backend.execute(credentials, &command).await,
            Err(e) => {
                tracing::info!(backend = %kind, error = %e, "Query rejected");
                Err(e)
            }
        };
        envelope(result, started)
    }

    /// 测试数据库连接，并返回耗时
    pub async fn test_connection(
        &self,
        kind: BackendKind,
        credentials: &Credentials,
    ) -> ApiResponse<ConnectionCheck> {
        let started = Instant::now();
        let result = self
            .backend(kind)
            .test_connection(credentials)
            .await
            .map(|()| ConnectionCheck {
                backend: kind,
                latency_ms: started.elapsed().as_millis() as u64,
            });
        envelope(result, started)
    }

    /// 列出数据库中的表或集合
    pub async fn list_tables(
        &self,
        kind: BackendKind,
        credentials: &Credentials,
    ) -> ApiResponse<Vec<TableItem>> {
        let started = Instant::now();
        envelope(self.backend(kind).list_tables(credentials).await, started)
    }

    /// 大模型连通性测试，发送 [`PROBE_PROMPT`]
    ///
    /// 未配置模型时返回 `configured: false`，不发起调用；
    /// 调用失败时错误写入信封。
    pub async fn probe_model(&self) -> ApiResponse<ModelProbe> {
        let started = Instant::now();
        let Some(model) = self.generator.model() else {
            return envelope(
                Ok(ModelProbe {
                    configured: false,
                    model: None,
                    prompt: PROBE_PROMPT.to_string(),
                    response: None,
                }),
                started,
            );
        };

        let call = tokio::time::timeout(self.generator.timeout(), model.generate_content(PROBE_PROMPT));
        let result = match call.await {
            Ok(Ok(text)) => Ok(ModelProbe {
                configured: true,
                model: Some(model.name().to_string()),
                prompt: PROBE_PROMPT.to_string(),
                response: Some(text),
            }),
            Ok(Err(e)) => Err(AppError::Internal(format!("model probe failed: {}", e))),
            Err(_) => Err(AppError::Internal(format!(
                "model probe timed out after {}s",
                self.generator.timeout().as_secs()
            ))),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Model probe failed");
        }
        envelope(result, started)
    }
}
