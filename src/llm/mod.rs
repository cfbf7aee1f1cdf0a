//! LLM 层：推理模型客户端抽象与实现（OpenAI 兼容多模态 / Mock）、重试、影像引用解析

pub mod image;
pub mod mock;
pub mod openai;
pub mod traits;

pub use image::ImageResolver;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient};
