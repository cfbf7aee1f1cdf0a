//! Mock 推理模型客户端（用于测试与离线演示，无需 API）
//!
//! 按脚本依次返回预设输出；脚本耗尽后回退为 echo 行为：
//! 最后一条是用户提问时请求 echo 动作，最后一条是观察结果时直接给出最终回答，便于本地跑通 ReAct 流程。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 观察消息前缀（与 react::planner 渲染的 ActionResult 消息一致）
const OBSERVATION_PREFIX: &str = "Observation";

/// Mock 客户端：脚本化输出，并记录每次收到的消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定输出
    pub fn scripted(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 纯文本脚本的便捷形式
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted(replies.into_iter().map(|s| Ok(s.into())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 第 n 次调用收到的消息
    pub fn call(&self, n: usize) -> Option<Vec<Message>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(n)
            .cloned()
    }

    fn echo_reply(messages: &[Message]) -> String {
        let last = messages.iter().rev().find(|m| m.role == Role::User);
        match last {
            Some(m) if m.content.starts_with(OBSERVATION_PREFIX) => {
                format!("Echo from Mock: {}", m.content)
            }
            Some(m) => serde_json::json!({
                "actions": [{"action": "echo", "arguments": {"text": m.content}}]
            })
            .to_string(),
            None => "(no input)".to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(reply) => reply,
            None => Ok(Self::echo_reply(messages)),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
