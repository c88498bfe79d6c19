//! 前端展示辅助：类别标签 / 颜色、思考摘要、结果摘要、耗时估计

use serde::Serialize;

use crate::trace::classifier::{categorize_tool, ResultType, Step, StepCategory, ToolGroup};

const THOUGHT_SUMMARY_CHARS: usize = 80;
const RESULT_SUMMARY_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepDisplay {
    pub title: String,
    pub category_label: &'static str,
    pub category_color: &'static str,
    pub thought_summary: Option<String>,
    pub result_summary: String,
    pub sql_formatted: Option<String>,
    pub execution_time_estimate: &'static str,
}

/// Step 加上展示字段
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayStep {
    #[serde(flatten)]
    pub step: Step,
    pub display: StepDisplay,
}

pub fn category_label(category: StepCategory) -> &'static str {
    match category {
        StepCategory::SchemaExploration => "Database Exploration",
        StepCategory::DataRetrieval => "Data Query",
        StepCategory::Validation => "Query Validation",
        StepCategory::Unknown => "Other Action",
    }
}

pub fn category_color(category: StepCategory) -> &'static str {
    match category {
        StepCategory::SchemaExploration => "#3498db",
        StepCategory::DataRetrieval => "#2ecc71",
        StepCategory::Validation => "#f39c12",
        StepCategory::Unknown => "#95a5a6",
    }
}

pub fn estimate_execution_time(category: StepCategory) -> &'static str {
    match category {
        StepCategory::SchemaExploration | StepCategory::Validation => "~1s",
        StepCategory::DataRetrieval => "~2-3s",
        StepCategory::Unknown => "~1-2s",
    }
}

/// 超过 80 字时优先截到 75..120 之间的句末标点，否则硬截断加省略号
pub fn summarize_thought(thought: Option<&str>) -> Option<String> {
    let thought = thought.filter(|t| !t.is_empty())?;
    let chars: Vec<char> = thought.chars().collect();
    if chars.len() <= THOUGHT_SUMMARY_CHARS {
        return Some(thought.to_string());
    }
    let boundary = (75..chars.len().min(120)).find(|&i| matches!(chars[i], '.' | '!' | '?'));
    Some(match boundary {
        Some(i) => chars[..=i].iter().collect(),
        None => format!("{}...", chars[..THOUGHT_SUMMARY_CHARS].iter().collect::<String>()),
    })
}

pub fn summarize_result(result: &str, result_type: ResultType) -> String {
    if result.is_empty() {
        return "No result".to_string();
    }
    match result_type {
        ResultType::TableList => {
            let tables: Vec<&str> = result.split(',').map(str::trim).collect();
            let more = if tables.len() > 3 { "..." } else { "" };
            format!(
                "Found {} tables: {}{}",
                tables.len(),
                tables.iter().take(3).copied().collect::<Vec<_>>().join(", "),
                more
            )
        }
        ResultType::SqlResult | ResultType::TabularData => {
            let lines = result.lines().count();
            if lines > 1 {
                format!("Retrieved {} rows of data", lines - 1)
            } else {
                "Query executed successfully".to_string()
            }
        }
        ResultType::SchemaInfo => "Retrieved table schema information".to_string(),
        _ if result.chars().count() <= RESULT_SUMMARY_CHARS => result.to_string(),
        _ => format!("{}...", result.chars().take(RESULT_SUMMARY_CHARS).collect::<String>()),
    }
}

pub fn format_step_for_display(step: &Step) -> DisplayStep {
    let category = step.action.category;
    let is_query = categorize_tool(&step.action.tool).group == ToolGroup::Query;
    DisplayStep {
        display: StepDisplay {
            title: format!("Step {}: {}", step.step_number, step.action.description),
            category_label: category_label(category),
            category_color: category_color(category),
            thought_summary: summarize_thought(step.thought.as_deref()),
            result_summary: summarize_result(&step.observation.result, step.observation.result_type),
            sql_formatted: is_query.then(|| step.action.input.clone()),
            execution_time_estimate: estimate_execution_time(category),
        },
        step: step.clone(),
    }
}
