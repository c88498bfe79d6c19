//! 轨迹汇总：类别直方图、去重工具集、执行模式、复杂度评分、执行流程描述
//!
//! 对空轨迹同样有定义（全零 / 空集合）。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::trace::classifier::{categorize_tool, Step, StepCategory, ToolGroup};

/// 复杂度上限
pub const MAX_COMPLEXITY: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceSummary {
    pub total_steps: usize,
    pub categories: BTreeMap<StepCategory, usize>,
    /// 按首次出现顺序去重
    pub tools_used: Vec<String>,
    pub execution_pattern: Vec<StepCategory>,
    pub final_action: Option<String>,
    pub complexity_score: u32,
}

pub fn summarize(steps: &[Step]) -> TraceSummary {
    let mut categories = BTreeMap::new();
    let mut tools_used: Vec<String> = Vec::new();
    for step in steps {
        *categories.entry(step.action.category).or_insert(0) += 1;
        if !tools_used.contains(&step.action.tool) {
            tools_used.push(step.action.tool.clone());
        }
    }

    TraceSummary {
        total_steps: steps.len(),
        categories,
        tools_used,
        execution_pattern: steps.iter().map(|s| s.action.category).collect(),
        final_action: steps.last().map(|s| s.action.description.clone()),
        complexity_score: complexity_score(steps),
    }
}

/// schema +1 / data +3 / validation +2；查询步骤另计 JOIN +2、GROUP BY +1、ORDER BY +1；封顶 10
pub fn complexity_score(steps: &[Step]) -> u32 {
    let raw: u32 = steps
        .iter()
        .map(|step| {
            let base = match step.action.category {
                StepCategory::SchemaExploration => 1,
                StepCategory::DataRetrieval => 3,
                StepCategory::Validation => 2,
                StepCategory::Unknown => 0,
            };
            let sql_bonus = if categorize_tool(&step.action.tool).group == ToolGroup::Query {
                let upper = step.action.input.to_uppercase();
                [("JOIN", 2u32), ("GROUP BY", 1), ("ORDER BY", 1)]
                    .iter()
                    .filter(|(kw, _)| upper.contains(kw))
                    .map(|(_, w)| *w)
                    .sum()
            } else {
                0
            };
            base + sql_bonus
        })
        .sum();
    raw.min(MAX_COMPLEXITY)
}

/// 每步一行：类别图标 + 目的
pub fn execution_flow(steps: &[Step]) -> Vec<String> {
    steps
        .iter()
        .map(|s| format!("{} {}", s.action.icon, s.action.purpose))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::AgentAction;
    use crate::trace::classifier::classify;

    fn step(n: usize, tool: &str, input: &str) -> Step {
        classify(n, &AgentAction::new(tool, input, ""), "ok")
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_steps, 0);
        assert!(summary.categories.is_empty());
        assert!(summary.tools_used.is_empty());
        assert_eq!(summary.final_action, None);
        assert_eq!(summary.complexity_score, 0);
        assert!(execution_flow(&[]).is_empty());
    }

    #[test]
    fn test_summarize_typical_trace() {
        let steps = vec![
            step(1, "sql_db_list_tables", ""),
            step(2, "sql_db_schema", "orders"),
            step(3, "sql_db_query_checker", "SELECT 1"),
            step(4, "sql_db_query", "SELECT c.name FROM orders o JOIN customers c ON c.id = o.cid ORDER BY o.total"),
            step(5, "sql_db_schema", "customers"),
        ];
        let summary = summarize(&steps);
        assert_eq!(summary.total_steps, 5);
        assert_eq!(summary.categories[&StepCategory::SchemaExploration], 3);
        assert_eq!(summary.categories[&StepCategory::DataRetrieval], 1);
        assert_eq!(
            summary.tools_used,
            vec!["sql_db_list_tables", "sql_db_schema", "sql_db_query_checker", "sql_db_query"]
        );
        assert_eq!(summary.execution_pattern[2], StepCategory::Validation);
        assert_eq!(summary.final_action.as_deref(), Some("Examining table schema and structure"));
        // 1 + 1 + 2 + (3 + 2 + 1) + 1
        assert_eq!(summary.complexity_score, 10);
    }

    #[test]
    fn test_complexity_is_clamped() {
        let steps: Vec<Step> = (1..=20)
            .map(|n| step(n, "sql_db_query", "SELECT a FROM t JOIN u ON t.id = u.id GROUP BY a ORDER BY a"))
            .collect();
        assert_eq!(complexity_score(&steps), 10);
        assert_eq!(complexity_score(&steps[..1]), 7);
    }

    #[test]
    fn test_execution_flow() {
        let flow = execution_flow(&[step(1, "sql_db_list_tables", ""), step(2, "mystery", "")]);
        assert_eq!(
            flow,
            vec!["🔍 Understanding database structure", "🔧 Performing agent action"]
        );
    }

    #[test]
    fn test_summary_serializes_category_keys() {
        let summary = summarize(&[step(1, "sql_db_query", "SELECT 1")]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["categories"]["data_retrieval"], 1);
    }
}
