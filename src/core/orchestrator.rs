//! 组件装配：根据配置创建推理模型客户端与动作目录
//!
//! 目录在启动时一次性构建：同名动作（DuplicateAction）视为配置错误，直接失败。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{ImageResolver, LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};
use crate::tools::{ActionCatalog, CatalogError, EchoTool, HttpTool, PluginTool};

/// 实际使用的推理模型后端：配置为 mock，或 openai 但既无 API Key 也无自定义地址时回退为 mock
pub fn effective_provider(cfg: &AppConfig) -> &'static str {
    match cfg.llm.provider.to_lowercase().as_str() {
        "mock" => "mock",
        _ if std::env::var("OPENAI_API_KEY").is_err()
            && cfg.llm.base_url.is_none()
            && std::env::var("OPENAI_BASE_URL").is_err() =>
        {
            "mock"
        }
        _ => "openai",
    }
}

/// 根据配置选择推理模型后端（OpenAI 兼容 / Mock），并包上重试
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = effective_provider(cfg);
    if provider == "mock" {
        if !cfg.llm.provider.eq_ignore_ascii_case("mock") {
            tracing::warn!("OPENAI_API_KEY not set and no base_url configured, using Mock LLM");
        }
        return Arc::new(MockLlmClient::new());
    }

    tracing::info!(
        "Using OpenAI-compatible LLM ({}, temperature {})",
        cfg.llm.model,
        cfg.llm.temperature
    );
    let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None)
        .with_temperature(cfg.llm.temperature)
        .with_max_tokens(cfg.llm.max_tokens)
        .with_request_timeout(cfg.llm.timeouts.request)
        .with_image_resolver(ImageResolver::new(cfg.tools.inline_remote_images));
    Arc::new(RetryingLlmClient::new(
        Arc::new(client),
        RetryConfig::from(&cfg.llm.retry),
    ))
}

/// 按配置注册能力提供方：echo（启用时或 mock 模式）、[[tools.http]]、[[tools.plugins]]
pub fn build_catalog(cfg: &AppConfig) -> Result<ActionCatalog, CatalogError> {
    let tools = &cfg.tools;
    let mut catalog = ActionCatalog::new();

    if tools.enable_echo || effective_provider(cfg) == "mock" {
        catalog.register_tool(EchoTool)?;
    }
    for entry in &tools.http {
        catalog.register_tool(HttpTool::new(
            entry,
            tools.tool_timeout_secs,
            tools.max_result_chars,
        ))?;
    }
    for entry in &tools.plugins {
        catalog.register_tool(PluginTool::new(entry, tools.max_result_chars))?;
    }

    tracing::info!(actions = ?catalog.names(), "Action catalog ready");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpToolEntry, PluginEntry};

    fn http_entry(name: &str) -> HttpToolEntry {
        HttpToolEntry {
            name: name.to_string(),
            description: "remote model".to_string(),
            endpoint: "http://127.0.0.1:8001/run".to_string(),
            params: vec![],
            timeout_secs: None,
            api_key_env: None,
        }
    }

    #[test]
    fn test_catalog_from_config() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.tools.http.push(http_entry("classify"));
        cfg.tools.plugins.push(PluginEntry {
            name: "segment".to_string(),
            description: "local segmenter".to_string(),
            program: "segment".to_string(),
            args: vec![],
            params: vec![],
            working_dir: None,
        });
        let catalog = build_catalog(&cfg).unwrap();
        assert_eq!(catalog.names(), vec!["echo", "classify", "segment"]);
    }

    #[test]
    fn test_duplicate_provider_names_fail_fast() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.tools.http.push(http_entry("vqa"));
        cfg.tools.http.push(http_entry("vqa"));
        assert_eq!(
            build_catalog(&cfg).unwrap_err(),
            CatalogError::DuplicateAction("vqa".into())
        );
    }

    #[test]
    fn test_mock_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "MOCK".to_string();
        assert_eq!(effective_provider(&cfg), "mock");
        assert_eq!(create_llm_from_config(&cfg).model_name(), "mock");
    }
}
