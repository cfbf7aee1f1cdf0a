//! HTTP 能力提供方：由配置 [[tools.http]] 注册的模型服务
//!
//! 将已校验的 arguments 以 JSON POST 到 endpoint（分类、分割、VQA、定位、报告生成等模型服务），
//! 响应为 JSON 时作为结构化结果，否则作为文本；非 2xx 状态、网络错误与超时均返回 Err。
//! 响应超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::HttpToolEntry;
use crate::tools::{truncate_output, ActionOutput, InputSchema, Tool};

/// HTTP 模型服务工具
pub struct HttpTool {
    name: String,
    description: String,
    endpoint: String,
    schema: InputSchema,
    client: Client,
    api_key: Option<String>,
    max_result_chars: usize,
}

impl HttpTool {
    /// 从配置条目创建；entry.timeout_secs 未设置时使用 default_timeout_secs
    pub fn new(entry: &HttpToolEntry, default_timeout_secs: u64, max_result_chars: usize) -> Self {
        let timeout = entry.timeout_secs.unwrap_or(default_timeout_secs).max(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(concat!("medreact/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        let api_key = entry
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            endpoint: entry.endpoint.clone(),
            schema: InputSchema {
                params: entry.params.clone(),
            },
            client,
            api_key,
            max_result_chars,
        }
    }

    async fn post(&self, args: &Value) -> Result<ActionOutput, String> {
        let mut req = self.client.post(&self.endpoint).json(args);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                format!("request to {} timed out", self.endpoint)
            } else {
                format!("request failed: {}", e)
            }
        })?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("read body: {}", e))?;
        if !status.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                status,
                truncate_output(body.trim(), 300)
            ));
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(v) if v.to_string().chars().count() <= self.max_result_chars => Ok(v.into()),
            Ok(v) => Ok(truncate_output(&v.to_string(), self.max_result_chars).into()),
            Err(_) => Ok(truncate_output(body.trim(), self.max_result_chars).into()),
        }
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> InputSchema {
        self.schema.clone()
    }

    async fn invoke(&self, args: Value) -> Result<ActionOutput, String> {
        tracing::info!(tool = %self.name, endpoint = %self.endpoint, "http tool invoke");
        self.post(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParamSpec, ParamType};

    fn entry(endpoint: &str) -> HttpToolEntry {
        HttpToolEntry {
            name: "classify".into(),
            description: "Chest X-ray classifier".into(),
            endpoint: endpoint.into(),
            params: vec![ParamSpec::required("image", ParamType::Image)],
            timeout_secs: Some(2),
            api_key_env: None,
        }
    }

    #[test]
    fn test_contract_from_entry() {
        let tool = HttpTool::new(&entry("http://127.0.0.1:9/classify"), 30, 8000);
        assert_eq!(tool.name(), "classify");
        assert_eq!(tool.input_schema().params.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        // 端口 9（discard）通常无人监听，连接被拒绝
        let tool = HttpTool::new(&entry("http://127.0.0.1:9/classify"), 30, 8000);
        let err = tool
            .invoke(serde_json::json!({"image": "cxr.png"}))
            .await
            .unwrap_err();
        assert!(err.contains("request"));
    }
}
