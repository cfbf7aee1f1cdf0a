//! 工具层：参数 Schema、动作目录、动作调度器与内置能力提供方（HTTP 模型服务 / 本地插件 / echo）

pub mod echo;
pub mod executor;
pub mod http;
pub mod plugin;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ActionDispatcher;
pub use http::HttpTool;
pub use plugin::PluginTool;
pub use registry::{ActionCatalog, ActionContract, ActionOutput, CatalogError, Tool};
pub use schema::{tool_call_schema_json, InputSchema, ParamSpec, ParamType, ValidationError};

/// 按字符数截断，超出时追加 ...[truncated]
pub fn truncate_output(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        s.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        s.to_string()
    }
}
