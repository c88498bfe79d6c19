//! SQL 工具集：列表、表结构、只读查询、查询检查
//!
//! 工具名与 ReAct prompt 约定一致（sql_db_*）。数据库调用为同步接口，这里统一经 spawn_blocking 执行。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::db::{run_blocking as blocking, SqlDatabase};
use crate::llm::{LlmClient, Message};
use crate::tools::ToolRegistry;

pub const LIST_TABLES: &str = "sql_db_list_tables";
pub const SCHEMA: &str = "sql_db_schema";
pub const QUERY: &str = "sql_db_query";
pub const QUERY_CHECKER: &str = "sql_db_query_checker";

/// 去掉模型常见的包裹：```sql 代码块、首尾引号
pub fn clean_input(input: &str) -> String {
    let mut s = input.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.strip_prefix("sql").unwrap_or(rest);
        s = s.strip_suffix("```").unwrap_or(s);
    }
    let s = s.trim();
    let unquoted = s
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        .unwrap_or(s);
    unquoted.trim().to_string()
}

/// 列出所有表
pub struct ListTablesTool {
    db: Arc<dyn SqlDatabase>,
}

impl ListTablesTool {
    pub fn new(db: Arc<dyn SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl crate::tools::Tool for ListTablesTool {
    fn name(&self) -> &str {
        LIST_TABLES
    }

    fn description(&self) -> &str {
        "Input is an empty string, output is a comma-separated list of tables in the database."
    }

    async fn run(&self, _input: &str) -> Result<String, AgentError> {
        let tables = blocking(&self.db, |db| db.list_tables()).await?;
        Ok(tables.join(", "))
    }
}

/// 查看指定表的建表语句与样例行
pub struct SchemaTool {
    db: Arc<dyn SqlDatabase>,
}

impl SchemaTool {
    pub fn new(db: Arc<dyn SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl crate::tools::Tool for SchemaTool {
    fn name(&self) -> &str {
        SCHEMA
    }

    fn description(&self) -> &str {
        "Input to this tool is a comma-separated list of tables, output is the schema and sample rows for those tables. \
         Be sure that the tables actually exist by calling sql_db_list_tables first! Example Input: table1, table2, table3"
    }

    async fn run(&self, input: &str) -> Result<String, AgentError> {
        let tables: Vec<String> = clean_input(input)
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tables.is_empty() {
            return Err(AgentError::execution("No table names given"));
        }
        blocking(&self.db, move |db| db.table_info(&tables)).await
    }
}

/// 执行只读查询，结果渲染为元组列表文本
pub struct QueryTool {
    db: Arc<dyn SqlDatabase>,
}

impl QueryTool {
    pub fn new(db: Arc<dyn SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl crate::tools::Tool for QueryTool {
    fn name(&self) -> &str {
        QUERY
    }

    fn description(&self) -> &str {
        "Input to this tool is a detailed and correct SQL query, output is a result from the database. \
         If the query is not correct, an error message will be returned. If an error is returned, rewrite the query, \
         check the query, and try again. If you encounter an issue with Unknown column 'xxxx' in 'field list', \
         use sql_db_schema to query the correct table fields."
    }

    async fn run(&self, input: &str) -> Result<String, AgentError> {
        let query = clean_input(input);
        let rows = blocking(&self.db, move |db| db.execute_read_only(&query)).await?;
        Ok(rows.render())
    }
}

const QUERY_CHECKER_PROMPT: &str = "{query}
Double check the {dialect} query above for common mistakes, including:
- Using NOT IN with NULL values
- Using UNION when UNION ALL should have been used
- Using BETWEEN for exclusive ranges
- Data type mismatch in predicates
- Properly quoting identifiers
- Using the correct number of arguments for functions
- Casting to the correct data type
- Using the proper columns for joins

If there are any of the above mistakes, rewrite the query. If there are no mistakes, just reproduce the original query.

Output the final SQL query only.

SQL Query: ";

/// 让 LLM 复核查询语句
pub struct QueryCheckerTool {
    llm: Arc<dyn LlmClient>,
    dialect: String,
}

impl QueryCheckerTool {
    pub fn new(llm: Arc<dyn LlmClient>, dialect: impl Into<String>) -> Self {
        Self {
            llm,
            dialect: dialect.into(),
        }
    }
}

#[async_trait]
impl crate::tools::Tool for QueryCheckerTool {
    fn name(&self) -> &str {
        QUERY_CHECKER
    }

    fn description(&self) -> &str {
        "Use this tool to double check if your query is correct before executing it. \
         Always use this tool before executing a query with sql_db_query!"
    }

    async fn run(&self, input: &str) -> Result<String, AgentError> {
        let prompt = QUERY_CHECKER_PROMPT
            .replace("{query}", &clean_input(input))
            .replace("{dialect}", &self.dialect);
        let checked = self.llm.complete(&[Message::user(prompt)]).await?;
        Ok(clean_input(&checked))
    }
}

/// 注册四个 SQL 工具
pub fn register_sql_tools(
    registry: &mut ToolRegistry,
    db: Arc<dyn SqlDatabase>,
    llm: Arc<dyn LlmClient>,
) {
    let dialect = db.dialect().to_string();
    registry.register(ListTablesTool::new(Arc::clone(&db)));
    registry.register(SchemaTool::new(Arc::clone(&db)));
    registry.register(QueryTool::new(db));
    registry.register(QueryCheckerTool::new(llm, dialect));
}
