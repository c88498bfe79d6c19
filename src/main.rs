//! SqlBee 命令行入口
//!
//! 用法：
//!   sqlbee ask "How many orders last month?" [--stream] [--no-trace]
//!   sqlbee status
//!   sqlbee tables

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use sqlbee::config::load_config;
use sqlbee::execution::EventKind;
use sqlbee::{create_agent_service, observability, QueryRequest};

#[derive(Parser)]
#[command(name = "sqlbee")]
#[command(about = "Ask questions about a SQL database in natural language", long_about = None)]
#[command(version)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 提问并输出结果
    Ask {
        question: Vec<String>,

        /// 以 JSON 行逐条输出执行事件
        #[arg(long)]
        stream: bool,

        /// 响应中不附带逐步轨迹
        #[arg(long)]
        no_trace: bool,
    },
    /// 服务状态
    Status,
    /// 数据库表与样例信息
    Tables,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load configuration")?;
    let service = create_agent_service(&cfg)
        .await
        .context("Failed to initialize agent service")?;

    match cli.command {
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&service.status().await)?);
        }
        Commands::Tables => {
            let info = service.database_info().await.context("Failed to read database info")?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Ask {
            question,
            stream: true,
            ..
        } => {
            let mut events = Box::pin(service.stream(&question.join(" ")));
            let mut failed = false;
            while let Some(ev) = events.next().await {
                match &ev.kind {
                    EventKind::Heartbeat {} => continue,
                    EventKind::Error { .. } => failed = true,
                    _ => {}
                }
                println!("{}", serde_json::to_string(&ev)?);
            }
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Ask {
            question, no_trace, ..
        } => {
            let request = QueryRequest {
                question: question.join(" "),
                include_trace: !no_trace,
            };
            let response = service.invoke(&request).await.context("Query failed")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}
