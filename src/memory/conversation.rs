//! 对话消息：推理模型 API 的输入单位
//!
//! Reasoning Step 将 Ledger 条目映射为 Message 序列交给 LlmClient；
//! User 消息可携带影像引用，由具体后端决定如何编码（见 llm::image）。

use serde::{Deserialize, Serialize};

use crate::memory::ImageRef;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// 带影像的用户消息
    pub fn user_with_images(content: impl Into<String>, images: Vec<ImageRef>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }
}
