//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SQLBEE__*` 覆盖（双下划线表示嵌套，如 `SQLBEE__LLM__MODEL=gpt-4o`）。
//! 加载后须调用 validate()，取值越界时在构建任何服务之前失败。

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub database: DatabaseSection,
    pub agent: AgentSection,
    pub server: ServerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// development / production
    pub environment: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "sqlbee".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// [llm] 段：后端选择、重试与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub max_retries: u32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 连通性测试结果缓存时长
    pub health_check_interval_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            max_retries: 2,
            request_timeout_secs: 30,
            health_check_interval_secs: 300,
        }
    }
}

/// [database] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// `sqlite:///path/to.db`，`sqlite:///:memory:` 为内存库
    pub uri: String,
    pub sample_rows_in_table_info: usize,
    pub busy_timeout_secs: u64,
    /// 健康检查结果缓存时长
    pub health_check_interval_secs: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            uri: "sqlite:///data/sqlbee.db".to_string(),
            sample_rows_in_table_info: 3,
            busy_timeout_secs: 5,
            health_check_interval_secs: 300,
        }
    }
}

/// [agent] 段：推理循环限制、流式参数、问题长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub max_execution_time_secs: u64,
    pub tool_timeout_secs: u64,
    /// prompt 中建议的结果条数上限
    pub top_k: usize,
    pub stream_poll_interval_ms: u64,
    pub stream_join_timeout_secs: u64,
    pub min_question_chars: usize,
    pub max_question_chars: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_execution_time_secs: 60,
            tool_timeout_secs: 30,
            top_k: 10,
            stream_poll_interval_ms: 1000,
            stream_join_timeout_secs: 5,
            min_question_chars: 3,
            max_question_chars: 1000,
        }
    }
}

/// [server] 段（web 特性）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    key: &str,
    value: T,
    min: T,
    max: T,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Message(format!(
            "{key} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

impl AppConfig {
    /// 取值范围检查
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("llm.temperature", self.llm.temperature, 0.0, 1.0)?;
        check_range("llm.max_retries", self.llm.max_retries, 0, 10)?;
        check_range("llm.request_timeout_secs", self.llm.request_timeout_secs, 5, 300)?;
        check_range("agent.max_iterations", self.agent.max_iterations, 5, 50)?;
        check_range("agent.max_execution_time_secs", self.agent.max_execution_time_secs, 10, 300)?;
        check_range("agent.tool_timeout_secs", self.agent.tool_timeout_secs, 1, 300)?;
        check_range("agent.stream_poll_interval_ms", self.agent.stream_poll_interval_ms, 10, 60_000)?;
        if self.database.uri.trim().is_empty() {
            return Err(ConfigError::Message("database.uri must not be empty".to_string()));
        }
        if self.agent.min_question_chars == 0
            || self.agent.min_question_chars > self.agent.max_question_chars
        {
            return Err(ConfigError::Message(
                "agent.min_question_chars must be in 1..=agent.max_question_chars".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app.environment.eq_ignore_ascii_case("production")
    }

    /// 限时模式的等待上限：循环自身时限 + 一次收尾 LLM 调用的时间
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.max_execution_time_secs + self.llm.request_timeout_secs)
    }
}

/// 从 config 目录加载配置，环境变量 SQLBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SQLBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SQLBEE")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.agent.max_iterations, 15);
        assert_eq!(cfg.invoke_timeout(), Duration::from_secs(90));
        assert!(!cfg.is_production());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut cfg = AppConfig::default();
        cfg.llm.temperature = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.agent.max_iterations = 51;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("agent.max_iterations"));

        let mut cfg = AppConfig::default();
        cfg.agent.max_execution_time_secs = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"mock\"\n\n[database]\nuri = \"sqlite:///:memory:\"\n\n[agent]\nmax_iterations = 8"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.database.uri, "sqlite:///:memory:");
        assert_eq!(cfg.agent.max_iterations, 8);
        // 未给出的键保持默认
        assert_eq!(cfg.agent.top_k, 10);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[agent]\nmax_iterations = 2").unwrap();
        assert!(load_config(Some(file.path().to_path_buf())).is_err());
    }
}
