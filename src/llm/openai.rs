//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! 用户消息携带的影像作为 image_url 内容片段发送；每次调用输出一条 JSON 审计日志（模型、温度、耗时、token）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{ImageResolver, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    request_timeout: Duration,
    images: ImageResolver,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    /// base_url / api_key 未给出时读取 OPENAI_BASE_URL / OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let base_url = base_url
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: 0.2,
            max_tokens: None,
            request_timeout: Duration::from_secs(120),
            images: ImageResolver::default(),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_image_resolver(mut self, images: ImageResolver) -> Self {
        self.images = images;
        self
    }

    async fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            let msg: ChatCompletionRequestMessage = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::User if m.images.is_empty() => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(self.multimodal_parts(m).await?)
                    .build()?
                    .into(),
            };
            out.push(msg);
        }
        Ok(out)
    }

    /// 文本在前，影像依次在后；无法解析的影像跳过并在文本中注明
    async fn multimodal_parts(
        &self,
        m: &Message,
    ) -> Result<Vec<ChatCompletionRequestUserMessageContentPart>, OpenAIError> {
        let mut text = m.content.clone();
        let mut image_parts = Vec::new();
        for r in &m.images {
            match self.images.resolve(r).await {
                Ok(url) => image_parts.push(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(ImageUrlArgs::default().url(url).build()?)
                        .build()?
                        .into(),
                ),
                Err(e) => {
                    tracing::warn!("Skipping image: {}", e);
                    text.push_str(&format!("\n[image unavailable: {}]", r));
                }
            }
        }

        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(text)
                .build()?
                .into(),
        ];
        parts.extend(image_parts);
        Ok(parts)
    }
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(err) if err.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(err) => LlmError::Network(err.to_string()),
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => {
            let msg = other.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("rate limit") || lower.contains("rate_limit") {
                LlmError::RateLimited { retry_after_ms: 0 }
            } else {
                LlmError::Api(msg)
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let start = Instant::now();
        let api_messages = self
            .to_openai_messages(messages)
            .await
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(api_messages)
            .temperature(self.temperature);
        if let Some(n) = self.max_tokens {
            args.max_completion_tokens(n);
        }
        let request = args
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(map_openai_error)?;

        let (prompt, completion) = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or((0, 0));
        self.usage.add(prompt, completion);

        let audit = serde_json::json!({
            "event": "oracle_audit",
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages.len(),
            "images": messages.iter().map(|m| m.images.len()).sum::<usize>(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "prompt_tokens": prompt,
            "completion_tokens": completion,
        });
        tracing::info!(audit = %audit.to_string(), "oracle");

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}
