//! 数据后端：只读 SQL 访问抽象与 SQLite 实现
//!
//! SqlDatabase 为同步接口（由工具经 spawn_blocking 调用）；任何以破坏性动词开头的语句在执行前被拒绝。

pub mod sqlite;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::AgentError;

pub use sqlite::{mask_uri, SqliteDatabase};

/// 破坏性 SQL 动词（按语句首词判断）
pub const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE",
];

/// 数据库错误
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Destructive SQL operations are not allowed: {0}")]
    Rejected(String),

    #[error("Query cannot be empty")]
    EmptyQuery,

    #[error("table_names {{{0}}} not found in database")]
    UnknownTable(String),

    #[error("SQL execution error: {0}")]
    Query(String),
}

/// 列信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub referred_table: String,
    pub referred_column: String,
}

/// 表结构
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<String>,
}

/// 查询结果：列名 + 行
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 渲染为元组列表文本，如 `[(1, 'Alice'), (2, None)]`；无结果时为空串
    pub fn render(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(render_value).collect();
                if cells.len() == 1 {
                    format!("({},)", cells[0])
                } else {
                    format!("({})", cells.join(", "))
                }
            })
            .collect();
        format!("[{}]", rows.join(", "))
    }
}

fn render_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        serde_json::Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        other => other.to_string(),
    }
}

/// 数据库健康状态（status 接口透传）
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub engine_status: String,
    pub database_type: String,
    pub database_uri: String,
    pub last_check_secs_ago: Option<u64>,
}

/// 只读 SQL 数据源
pub trait SqlDatabase: Send + Sync {
    /// 方言名（如 sqlite）
    fn dialect(&self) -> &str;

    fn test_connection(&self) -> bool;

    fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    fn get_schema(&self, table: &str) -> Result<TableSchema, DatabaseError>;

    /// 建表语句 + 若干样例行，供 LLM 理解表结构
    fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError>;

    /// 执行只读查询；破坏性语句返回 Rejected
    fn execute_read_only(&self, query: &str) -> Result<QueryRows, DatabaseError>;

    fn health_status(&self) -> DatabaseHealth;

    /// 中断当前正在执行的语句（调用方已放弃等待时使用）
    fn interrupt(&self) {}
}

/// 语句首词检查：空语句与破坏性动词直接拒绝
pub fn check_read_only(query: &str) -> Result<(), DatabaseError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(DatabaseError::EmptyQuery);
    }
    let first_word: String = trimmed
        .trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase();
    if let Some(kw) = DESTRUCTIVE_KEYWORDS.iter().find(|kw| **kw == first_word) {
        tracing::warn!(query = %preview(trimmed, 100), "Blocked destructive query");
        return Err(DatabaseError::Rejected((*kw).to_string()));
    }
    Ok(())
}

/// 调用方的 future 在阻塞任务结束前被丢弃（如工具超时）时中断数据库
struct InterruptOnDrop {
    db: Arc<dyn SqlDatabase>,
    running: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed && self.running.load(Ordering::Acquire) {
            tracing::warn!(dialect = %self.db.dialect(), "Caller gave up on database call, interrupting");
            self.db.interrupt();
        }
    }
}

/// 在阻塞线程池上执行一次数据库调用，错误按类别转为 AgentError
///
/// 返回的 future 若在完成前被丢弃，仍在执行的语句会被中断，连接随即释放。
pub async fn run_blocking<T, F>(db: &Arc<dyn SqlDatabase>, f: F) -> Result<T, AgentError>
where
    T: Send + 'static,
    F: FnOnce(&dyn SqlDatabase) -> Result<T, DatabaseError> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));
    let mut guard = InterruptOnDrop {
        db: Arc::clone(db),
        running: Arc::clone(&running),
        armed: true,
    };
    let db = Arc::clone(db);
    let joined = tokio::task::spawn_blocking(move || {
        running.store(true, Ordering::Release);
        let result = f(db.as_ref());
        running.store(false, Ordering::Release);
        result
    })
    .await;
    guard.armed = false;
    Ok(joined??)
}

pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_read_only_rejects_destructive() {
        for q in ["DROP TABLE users", "  delete from users", "Insert into t values (1)", "TRUNCATE t"] {
            assert!(matches!(check_read_only(q), Err(DatabaseError::Rejected(_))), "{q}");
        }
        assert!(matches!(check_read_only("   "), Err(DatabaseError::EmptyQuery)));
        assert!(check_read_only("SELECT * FROM updates").is_ok());
        assert!(check_read_only("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
    }

    #[test]
    fn test_render_rows() {
        let rows = QueryRows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![json!(1), json!("Alice")],
                vec![json!(2), serde_json::Value::Null],
            ],
        };
        assert_eq!(rows.render(), "[(1, 'Alice'), (2, None)]");
    }

    #[test]
    fn test_render_single_column_and_empty() {
        let rows = QueryRows {
            columns: vec!["count".into()],
            rows: vec![vec![json!(5)]],
        };
        assert_eq!(rows.render(), "[(5,)]");
        assert_eq!(QueryRows::default().render(), "");
    }

    #[test]
    fn test_render_escapes_quotes() {
        let rows = QueryRows {
            columns: vec!["name".into()],
            rows: vec![vec![json!("O'Brien")]],
        };
        assert_eq!(rows.render(), r"[('O\'Brien',)]");
    }
}
