//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MEDREACT__*` 覆盖（双下划线表示嵌套，如 `MEDREACT__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::ParamSpec;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、系统指令、会话记录目录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 系统指令文本；设置后作为 System 条目写入每个新会话账本的首位
    pub system_prompt: Option<String>,
    /// 从文件读取系统指令（system_prompt 未设置时生效）
    pub system_prompt_path: Option<PathBuf>,
    /// 会话账本 JSONL 的输出目录；未设置时不落盘
    pub transcript_dir: Option<PathBuf>,
}

/// [llm] 段：推理模型后端、采样参数、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 覆盖 API 地址；未设置时读取 OPENAI_BASE_URL
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: None,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [llm.retry] 段：指数退避（等待 = min(max, max(min, 2^n 秒))）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_backoff_ms() -> u64 {
    4_000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

/// [agent] 段：循环上限与动作并发
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 每次提问最多的 REASON→DISPATCH 往返次数；0 表示不限制
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 同一批动作的最大并发数
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_concurrent_actions: default_max_concurrent_actions(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_concurrent_actions() -> usize {
    3
}

/// [tools] 段：调用超时、影像内联、外部能力提供方
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次动作调用的外层超时（秒），0 表示交给 provider 自行处理
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 是否下载 http(s) 影像并以 data URL 内联发送给推理模型
    #[serde(default)]
    pub inline_remote_images: bool,
    /// provider 返回内容的最大字符数，超出截断
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    /// 注册 echo 诊断工具
    #[serde(default)]
    pub enable_echo: bool,
    #[serde(default)]
    pub http: Vec<HttpToolEntry>,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            inline_remote_images: false,
            max_result_chars: default_max_result_chars(),
            enable_echo: false,
            http: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_max_result_chars() -> usize {
    8000
}

/// [[tools.http]]：以 HTTP POST 调用的模型服务（分类、分割、VQA、定位、报告生成等）
#[derive(Debug, Clone, Deserialize)]
pub struct HttpToolEntry {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// 请求超时（秒），未设置时用 tools.tool_timeout_secs
    pub timeout_secs: Option<u64>,
    /// 从该环境变量读取 Bearer token
    pub api_key_env: Option<String>,
}

/// [[tools.plugins]]：本地程序实现的能力，参数模板中 {{key}} 取自动作参数，完整参数 JSON 写入 stdin
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub working_dir: Option<PathBuf>,
}

impl AppConfig {
    /// 解析系统指令：内联文本优先，其次读取文件
    pub fn system_prompt(&self) -> Option<String> {
        if let Some(p) = &self.app.system_prompt {
            return Some(p.clone());
        }
        let path = self.app.system_prompt_path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Cannot read system prompt {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// 从 config 目录加载配置，环境变量 MEDREACT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MEDREACT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
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
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MEDREACT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParamType;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.max_concurrent_actions, 3);
        assert_eq!(cfg.llm.retry.max_attempts, 3);
        assert_eq!(cfg.llm.retry.min_backoff_ms, 4_000);
        assert!((cfg.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert!(cfg.system_prompt().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medreact.toml");
        std::fs::write(
            &path,
            r#"
[app]
system_prompt = "You are a radiology assistant."

[llm]
provider = "mock"
model = "gpt-4o-mini"

[agent]
max_iterations = 4

[[tools.http]]
name = "classify"
description = "Chest X-ray pathology classifier"
endpoint = "http://localhost:8001/classify"
params = [{ name = "image", type = "image" }, { name = "threshold", type = "number", required = false }]

[[tools.plugins]]
name = "segment"
description = "Segment anatomical structures"
program = "python3"
args = ["segment.py", "{{image}}"]
params = [{ name = "image", type = "image" }]
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.agent.max_iterations, 4);
        assert_eq!(cfg.agent.max_concurrent_actions, 3);
        assert_eq!(cfg.tools.http.len(), 1);
        assert_eq!(cfg.tools.http[0].params[0].ty, ParamType::Image);
        assert!(!cfg.tools.http[0].params[1].required);
        assert_eq!(cfg.tools.plugins[0].args[1], "{{image}}");
        assert_eq!(
            cfg.system_prompt().as_deref(),
            Some("You are a radiology assistant.")
        );
    }

    #[test]
    fn test_system_prompt_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("system.txt");
        std::fs::write(&prompt, "Use the tools.").unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt_path = Some(prompt);
        assert_eq!(cfg.system_prompt().as_deref(), Some("Use the tools."));
    }
}
