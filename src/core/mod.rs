//! 核心层：错误分类与跨调用共享的使用统计

pub mod error;
pub mod stats;

pub use error::{AgentError, BoxError, ErrorKind};
pub use stats::{UsageSnapshot, UsageStatistics};
pub(crate) use stats::round2;
