//! 推理模型（Oracle）客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete：输入对话消息（可含影像），返回原始文本。
//! 原始文本到 OracleEntry 的解析由 react::planner 负责，编排状态机不依赖任何具体线格式。
//! RetryingLlmClient 为任意后端加上指数退避重试（仅重试瞬时错误）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LlmRetrySection;
use crate::memory::Message;

/// 推理模型调用错误（传输层）；会以 AgentError::Oracle 直接返回给调用方，不写入账本
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 网络、超时、限流视为瞬时错误，可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::Timeout | LlmError::RateLimited { .. }
        )
    }
}

/// 推理模型客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：返回模型原始输出
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }

    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// 重试配置：最多 max_attempts 次调用，第 n 次失败后等待 clamp(2^n 秒, min_backoff, max_backoff)
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&LlmRetrySection::default())
    }
}

impl From<&LlmRetrySection> for RetryConfig {
    fn from(s: &LlmRetrySection) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            min_backoff: Duration::from_millis(s.min_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms.max(s.min_backoff_ms)),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次（从 1 开始）失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(1u64 << attempt.min(16));
        exp.clamp(self.min_backoff, self.max_backoff)
    }
}

/// 带重试的客户端包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.complete(messages).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let mut wait = self.config.backoff(attempt);
                    if let LlmError::RateLimited { retry_after_ms } = e {
                        wait = wait.max(Duration::from_millis(retry_after_ms));
                    }
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Oracle call failed ({}), retrying",
                        e
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_backoff_is_clamped() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_secs(4));
        assert_eq!(cfg.backoff(2), Duration::from_secs(4));
        assert_eq!(cfg.backoff(3), Duration::from_secs(8));
        assert_eq!(cfg.backoff(4), Duration::from_secs(10));
        assert_eq!(cfg.backoff(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::Network("reset".into())),
            Err(LlmError::Timeout),
            Ok("final answer".into()),
        ]));
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        let out = client.complete(&[Message::user("q")]).await.unwrap();
        assert_eq!(out, "final answer");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::Network("a".into())),
            Err(LlmError::Network("b".into())),
            Err(LlmError::Network("c".into())),
            Ok("never".into()),
        ]));
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        let err = client.complete(&[Message::user("q")]).await.unwrap_err();
        assert_eq!(err, LlmError::Network("c".into()));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let mock = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::Api("invalid model".into())),
            Ok("never".into()),
        ]));
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        assert!(client.complete(&[Message::user("q")]).await.is_err());
        assert_eq!(mock.call_count(), 1);
    }
}
