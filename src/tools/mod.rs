pub mod executor;
pub mod registry;
pub mod sql;

pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use sql::{register_sql_tools, ListTablesTool, QueryCheckerTool, QueryTool, SchemaTool};
