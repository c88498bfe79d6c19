//! 轨迹分类：把 (动作, 观察) 原文转成结构化 Step
//!
//! 纯函数，无 I/O。启发式规则写成有序表：思考提取表、工具查找表、结果类型表，按顺序命中第一条。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::react::AgentAction;

/// 步骤类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    SchemaExploration,
    DataRetrieval,
    Validation,
    Unknown,
}

impl StepCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepCategory::SchemaExploration => "schema_exploration",
            StepCategory::DataRetrieval => "data_retrieval",
            StepCategory::Validation => "validation",
            StepCategory::Unknown => "unknown",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            StepCategory::SchemaExploration => "🔍",
            StepCategory::DataRetrieval => "📊",
            StepCategory::Validation => "✅",
            StepCategory::Unknown => "🔧",
        }
    }
}

/// 观察结果类型（供前端选择渲染方式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Empty,
    TableList,
    SchemaInfo,
    TabularData,
    SqlResultTuple,
    SqlResultList,
    SqlResult,
    ValidationResult,
    SchemaDefinition,
    ListData,
    Text,
}

/// 工具所属的功能组，决定输入格式化与结果类型判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGroup {
    ListTables,
    Schema,
    Query,
    Checker,
    Other,
}

/// 工具的静态描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub category: StepCategory,
    pub description: String,
    pub purpose: String,
    #[serde(skip)]
    pub group: ToolGroup,
}

/// (工具名, 组, 类别, 描述, 目的)；兼容旧版工具名
const TOOL_TABLE: &[(&str, ToolGroup, StepCategory, &str, &str)] = &[
    ("sql_db_list_tables", ToolGroup::ListTables, StepCategory::SchemaExploration,
     "Listing all available tables in the database", "Understanding database structure"),
    ("sql_db_schema", ToolGroup::Schema, StepCategory::SchemaExploration,
     "Examining table schema and structure", "Understanding table columns and relationships"),
    ("sql_db_query", ToolGroup::Query, StepCategory::DataRetrieval,
     "Executing SQL query to retrieve data", "Getting the actual data to answer the question"),
    ("sql_db_query_checker", ToolGroup::Checker, StepCategory::Validation,
     "Validating SQL query syntax and logic", "Ensuring query correctness before execution"),
    ("list_sql_database", ToolGroup::ListTables, StepCategory::SchemaExploration,
     "Listing database tables and structure", "Understanding available data sources"),
    ("info_sql_database", ToolGroup::Schema, StepCategory::SchemaExploration,
     "Getting detailed table information", "Understanding table schemas and relationships"),
    ("query_sql_database", ToolGroup::Query, StepCategory::DataRetrieval,
     "Executing SQL query against database", "Retrieving data to answer the question"),
    ("query_sql_checker", ToolGroup::Checker, StepCategory::Validation,
     "Checking SQL query for errors", "Validating query syntax and logic"),
];

/// 工具查找：未知工具归为 unknown
pub fn categorize_tool(tool: &str) -> ToolInfo {
    TOOL_TABLE
        .iter()
        .find(|(name, ..)| *name == tool)
        .map(|(_, group, category, description, purpose)| ToolInfo {
            category: *category,
            description: description.to_string(),
            purpose: purpose.to_string(),
            group: *group,
        })
        .unwrap_or_else(|| ToolInfo {
            category: StepCategory::Unknown,
            description: format!("Using tool: {tool}"),
            purpose: "Performing agent action".to_string(),
            group: ToolGroup::Other,
        })
}

// ---------- 思考提取 ----------

const RATIONALE_PATTERNS: &[&str] = &[
    r"(?is)Thought:\s*(.*?)(?:\n(?:Action|Final Answer)|\z)",
    r"(?is)I need to\s*(.*?)(?:\n|\z)",
    r"(?is)Let me\s*(.*?)(?:\n|\z)",
    r"(?is)I should\s*(.*?)(?:\n|\z)",
    r"(?is)First,?\s*(.*?)(?:\n|\z)",
    r"(?is)Now\s*(.*?)(?:\n|\z)",
    r"(?is)To answer this\s*(.*?)(?:\n|\z)",
    r"(?is)I'll\s*(.*?)(?:\n|\z)",
];

/// 捕获内容须长于此值才算命中
const MIN_RATIONALE_CHARS: usize = 5;
/// 兜底句子须长于此值
const MIN_SENTENCE_CHARS: usize = 20;
const NON_RATIONALE_PREFIXES: &[&str] = &["Action:", "Final Answer:", "Observation:"];

static RATIONALE_RULES: OnceLock<Vec<Regex>> = OnceLock::new();

fn rationale_rules() -> &'static [Regex] {
    RATIONALE_RULES.get_or_init(|| {
        RATIONALE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// 从 LLM 原始输出中提取思考
pub fn extract_rationale(log: &str) -> Option<String> {
    if log.is_empty() {
        return None;
    }
    for re in rationale_rules() {
        let Some(caps) = re.captures(log) else {
            continue;
        };
        let thought = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if thought.chars().count() > MIN_RATIONALE_CHARS {
            return Some(thought.to_string());
        }
    }

    log.split('.')
        .map(str::trim)
        .find(|s| {
            s.chars().count() > MIN_SENTENCE_CHARS
                && !NON_RATIONALE_PREFIXES.iter().any(|p| s.starts_with(p))
        })
        .map(str::to_string)
}

// ---------- SQL 格式化 ----------

const SQL_KEYWORDS: &str = r"UNION\s+ALL|INNER\s+JOIN|LEFT\s+JOIN|RIGHT\s+JOIN|GROUP\s+BY|ORDER\s+BY|SELECT|FROM|WHERE|JOIN|HAVING|LIMIT|UNION";

static SQL_SPLIT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static SQL_CLAUSE_START_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn sql_split_re() -> Option<&'static Regex> {
    SQL_SPLIT_RE
        .get_or_init(|| Regex::new(&format!(r"(?i)\b(?:{SQL_KEYWORDS})\b")).ok())
        .as_ref()
}

fn sql_clause_start_re() -> Option<&'static Regex> {
    SQL_CLAUSE_START_RE
        .get_or_init(|| Regex::new(&format!(r"(?i)^(?:{SQL_KEYWORDS})\b")).ok())
        .as_ref()
}

/// 按单引号字面量切分：(片段, 是否在字面量内)；`''` 转义自然落在两段字面量之间
fn split_string_literals(query: &str) -> Vec<(&str, bool)> {
    let mut pieces = Vec::new();
    let mut in_literal = false;
    let mut start = 0;
    for (i, c) in query.char_indices() {
        if c != '\'' {
            continue;
        }
        if in_literal {
            pieces.push((&query[start..=i], true));
            start = i + 1;
        } else {
            pieces.push((&query[start..i], false));
            start = i;
        }
        in_literal = !in_literal;
    }
    pieces.push((&query[start..], in_literal));
    pieces
}

/// 主要子句前换行，其余行缩进四格，去掉空行；只改字面量之外的空白，不改大小写与内容
pub fn format_sql_query(query: &str) -> String {
    let query = query.trim();
    let (Some(split), Some(clause)) = (sql_split_re(), sql_clause_start_re()) else {
        return query.to_string();
    };

    let mut lines = vec![String::new()];
    for (piece, literal) in split_string_literals(query) {
        if literal {
            if let Some(line) = lines.last_mut() {
                line.push_str(piece);
            }
            continue;
        }
        let broken = split.replace_all(piece, "\n$0");
        let mut parts = broken.split('\n');
        if let (Some(first), Some(line)) = (parts.next(), lines.last_mut()) {
            line.push_str(first);
        }
        lines.extend(parts.map(str::to_string));
    }

    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| {
            if clause.is_match(l) {
                l.to_string()
            } else {
                format!("    {l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------- 结果类型 ----------

type ResultRule = (fn(&str, ToolGroup) -> bool, ResultType);

fn is_blank(text: &str, _: ToolGroup) -> bool {
    text.trim().is_empty()
}
fn is_list_tool(_: &str, group: ToolGroup) -> bool {
    group == ToolGroup::ListTables
}
fn is_schema_tool(_: &str, group: ToolGroup) -> bool {
    group == ToolGroup::Schema
}
fn is_query_table(text: &str, group: ToolGroup) -> bool {
    group == ToolGroup::Query && text.contains('|') && text.contains('\n')
}
fn is_query_tuple(text: &str, group: ToolGroup) -> bool {
    let t = text.trim();
    group == ToolGroup::Query && t.starts_with('(') && t.ends_with(')')
}
fn is_query_list(text: &str, group: ToolGroup) -> bool {
    let t = text.trim();
    group == ToolGroup::Query && t.starts_with('[') && t.ends_with(']')
}
fn is_query(_: &str, group: ToolGroup) -> bool {
    group == ToolGroup::Query
}
fn is_checker(_: &str, group: ToolGroup) -> bool {
    group == ToolGroup::Checker
}
fn looks_tabular(text: &str, _: ToolGroup) -> bool {
    text.matches('\n').count() > 3 && text.contains('|')
}
fn looks_ddl(text: &str, _: ToolGroup) -> bool {
    text.starts_with("CREATE")
}
fn looks_list(text: &str, _: ToolGroup) -> bool {
    text.matches(',').count() > 3 && text.chars().count() < 200
}

const RESULT_RULES: &[ResultRule] = &[
    (is_blank, ResultType::Empty),
    (is_list_tool, ResultType::TableList),
    (is_schema_tool, ResultType::SchemaInfo),
    (is_query_table, ResultType::TabularData),
    (is_query_tuple, ResultType::SqlResultTuple),
    (is_query_list, ResultType::SqlResultList),
    (is_query, ResultType::SqlResult),
    (is_checker, ResultType::ValidationResult),
    (looks_tabular, ResultType::TabularData),
    (looks_ddl, ResultType::SchemaDefinition),
    (looks_list, ResultType::ListData),
];

pub fn detect_result_type(result: &str, tool: &str) -> ResultType {
    let group = categorize_tool(tool).group;
    RESULT_RULES
        .iter()
        .find(|(rule, _)| rule(result, group))
        .map(|(_, kind)| *kind)
        .unwrap_or(ResultType::Text)
}

// ---------- Step ----------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepAction {
    pub tool: String,
    pub category: StepCategory,
    pub description: String,
    pub purpose: String,
    pub icon: String,
    /// 格式化后的输入（查询工具为排版后的 SQL）
    pub input: String,
    pub raw_input: String,
    pub full_log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepObservation {
    pub result: String,
    pub result_type: ResultType,
    pub success: bool,
    pub length: usize,
}

/// 一次动作与其观察合成的步骤；创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub step_number: usize,
    pub thought: Option<String>,
    pub action: StepAction,
    pub observation: StepObservation,
}

/// 只处理动作部分（流式模式下动作与观察分开到达）
pub fn classify_action(action: &AgentAction) -> (Option<String>, StepAction) {
    let info = categorize_tool(&action.tool);
    let input = if info.group == ToolGroup::Query {
        format_sql_query(&action.tool_input)
    } else {
        action.tool_input.clone()
    };
    let step_action = StepAction {
        tool: action.tool.clone(),
        category: info.category,
        icon: info.category.icon().to_string(),
        description: info.description,
        purpose: info.purpose,
        input,
        raw_input: action.tool_input.clone(),
        full_log: action.log.clone(),
    };
    (extract_rationale(&action.log), step_action)
}

pub fn classify_observation(tool: &str, observation: &str) -> StepObservation {
    StepObservation {
        result: observation.to_string(),
        result_type: detect_result_type(observation, tool),
        success: !observation.trim().is_empty(),
        length: observation.chars().count(),
    }
}

/// 把一对 (动作, 观察) 转为第 step_number 步（从 1 开始）
pub fn classify(step_number: usize, action: &AgentAction, observation: &str) -> Step {
    let (thought, step_action) = classify_action(action);
    Step {
        step_number,
        thought,
        action: step_action,
        observation: classify_observation(&action.tool, observation),
    }
}

/// 按顺序分类整条轨迹，序号连续
pub fn classify_trace(steps: &[(AgentAction, String)]) -> Vec<Step> {
    steps
        .iter()
        .enumerate()
        .map(|(i, (action, observation))| classify(i + 1, action, observation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_rationale_thought_marker() {
        let log = "Thought: check the orders table\nAction: sql_db_schema\nAction Input: orders";
        assert_eq!(extract_rationale(log).as_deref(), Some("check the orders table"));
    }

    #[test]
    fn test_extract_rationale_cue_phrases() {
        assert_eq!(
            extract_rationale("I need to find the biggest customer\nAction: x").as_deref(),
            Some("find the biggest customer")
        );
        // 命中过短时落到下一条规则
        assert_eq!(
            extract_rationale("Thought: ok\nAction: x\nLet me query the invoices table").as_deref(),
            Some("query the invoices table")
        );
    }

    #[test]
    fn test_extract_rationale_sentence_fallback_and_absent() {
        assert_eq!(
            extract_rationale("The invoices table holds totals per month. Action: sql_db_query").as_deref(),
            Some("The invoices table holds totals per month")
        );
        assert_eq!(extract_rationale("Action: sql_db_list_tables\nAction Input: "), None);
        assert_eq!(extract_rationale(""), None);
    }

    #[test]
    fn test_categorize_tool() {
        assert_eq!(categorize_tool("sql_db_query").category, StepCategory::DataRetrieval);
        assert_eq!(categorize_tool("query_sql_checker").category, StepCategory::Validation);
        let unknown = categorize_tool("web_search");
        assert_eq!(unknown.category, StepCategory::Unknown);
        assert_eq!(unknown.description, "Using tool: web_search");
    }

    #[test]
    fn test_format_sql_query() {
        let formatted = format_sql_query(
            "select name, count(*) from users u inner join orders o on o.uid = u.id where o.total > 5 group by name order by 2 desc limit 3",
        );
        assert_eq!(
            formatted,
            "select name, count(*)\nfrom users u\ninner join orders o on o.uid = u.id\nwhere o.total > 5\ngroup by name\norder by 2 desc\nlimit 3"
        );
    }

    #[test]
    fn test_format_sql_indents_continuations() {
        let formatted = format_sql_query("SELECT a,\n  b\n\n\nFROM t");
        assert_eq!(formatted, "SELECT a,\n    b\nFROM t");
        assert_eq!(format_sql_query("SELECT updated_at FROM fromage"), "SELECT updated_at\nFROM fromage");
    }

    #[test]
    fn test_format_sql_keeps_string_literals() {
        let formatted = format_sql_query("SELECT id FROM t WHERE note = 'pick from   here'");
        assert_eq!(formatted, "SELECT id\nFROM t\nWHERE note = 'pick from   here'");

        let formatted = format_sql_query("SELECT 'it''s where\n  we order' AS s FROM t ORDER BY s");
        assert_eq!(formatted, "SELECT 'it''s where\n  we order' AS s\nFROM t\nORDER BY s");
    }

    #[test]
    fn test_detect_result_type() {
        assert_eq!(detect_result_type("a|b|c\n1|2|3", "sql_db_query"), ResultType::TabularData);
        assert_eq!(detect_result_type("(5,)", "sql_db_query"), ResultType::SqlResultTuple);
        assert_eq!(detect_result_type("[(1, 'a')]", "sql_db_query"), ResultType::SqlResultList);
        assert_eq!(detect_result_type("Error: boom", "sql_db_query"), ResultType::SqlResult);
        assert_eq!(detect_result_type("", "sql_db_query"), ResultType::Empty);
        assert_eq!(detect_result_type("users, orders", "sql_db_list_tables"), ResultType::TableList);
        assert_eq!(detect_result_type("SELECT 1", "sql_db_query_checker"), ResultType::ValidationResult);
        assert_eq!(detect_result_type("CREATE TABLE t (x int)", "other"), ResultType::SchemaDefinition);
        assert_eq!(detect_result_type("a, b, c, d, e", "other"), ResultType::ListData);
        assert_eq!(detect_result_type("hello", "other"), ResultType::Text);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let action = AgentAction::new(
            "sql_db_query",
            "SELECT COUNT(*) FROM orders",
            "Thought: count the orders\nAction: sql_db_query\nAction Input: SELECT COUNT(*) FROM orders",
        );
        let a = classify(1, &action, "[(42,)]");
        let b = classify(1, &action, "[(42,)]");
        assert_eq!(a, b);
        assert_eq!(a.thought.as_deref(), Some("count the orders"));
        assert_eq!(a.action.input, "SELECT COUNT(*)\nFROM orders");
        assert_eq!(a.action.raw_input, "SELECT COUNT(*) FROM orders");
        assert_eq!(a.observation.result_type, ResultType::SqlResultList);
        assert!(a.observation.success);
    }

    #[test]
    fn test_classify_trace_numbers_steps() {
        let steps = vec![
            (AgentAction::new("sql_db_list_tables", "", ""), "users".to_string()),
            (AgentAction::new("sql_db_schema", "users", ""), "CREATE TABLE users".to_string()),
        ];
        let classified = classify_trace(&steps);
        assert_eq!(classified.iter().map(|s| s.step_number).collect::<Vec<_>>(), vec![1, 2]);
    }
}
