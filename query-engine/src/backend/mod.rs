//! 数据库后端
//!
//! 每个请求按 [`BackendKind`] 选定一个 [`Backend`]，
//! 结构获取、提示词构建、语法校验和执行都经由它完成。

pub mod document;
pub mod relational;

use async_trait::async_trait;

use common::errors::AppResult;
use common::models::{BackendKind, Credentials, QueryPayload, SchemaMap, TableItem};

use crate::grammar::{self, Command};
use crate::prompt;

pub use document::DocumentBackend;
pub use relational::RelationalBackend;

/// 后端能力接口
#[async_trait]
pub trait Backend: Send + Sync {
    /// 后端类型
    fn kind(&self) -> BackendKind;

    /// 获取 `tables` 的结构
    ///
    /// 单个表获取失败时其列为空；只有无法连接时整个调用才失败。
    async fn introspect(&self, credentials: &Credentials, tables: &[String])
        -> AppResult<SchemaMap>;

    /// 构建发送给大模型的提示词
    fn build_prompt(&self, natural_language: &str, tables: &[String], schema: &SchemaMap) -> String {
        prompt::build(self.kind(), natural_language, tables, schema)
    }

    /// 按本后端的语法校验查询文本
    fn parse_command(&self, text: &str) -> AppResult<Command> {
        grammar::parse_command(self.kind(), text)
    }

    /// 关键字兜底查询，结果总能通过 [`Backend::parse_command`] 校验
    fn fallback_query(&self, natural_language: &str, tables: &[String]) -> String;

    /// 在新连接上执行一次已校验的命令，结束后释放连接
    async fn execute(&self, credentials: &Credentials, command: &Command) -> AppResult<QueryPayload>;

    /// 测试连接
    async fn test_connection(&self, credentials: &Credentials) -> AppResult<()>;

    /// 列出表或集合
    async fn list_tables(&self, credentials: &Credentials) -> AppResult<Vec<TableItem>>;
}
