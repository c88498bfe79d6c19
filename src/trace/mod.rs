//! 推理轨迹处理：分类（classifier）、汇总（summary）、展示（display）

pub mod classifier;
pub mod display;
pub mod summary;

pub use classifier::{
    categorize_tool, classify, classify_action, classify_observation, classify_trace,
    detect_result_type, extract_rationale, format_sql_query, ResultType, Step, StepAction,
    StepCategory, StepObservation, ToolInfo,
};
pub use display::{format_step_for_display, DisplayStep, StepDisplay};
pub use summary::{complexity_score, execution_flow, summarize, TraceSummary};
