//! ReAct 过程事件：用于 CLI 等前端实时展示推理、动作调用与观察

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 第几轮推理（从 1 开始）
    StepUpdate { step: usize, max_steps: Option<usize> },
    /// 正在调用推理模型
    Thinking,
    /// 推理模型附带的文字（调用动作前的说明）
    ThinkingContent { text: String },
    /// 调用动作
    ToolCall {
        request_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 动作返回（预览，避免过长）
    Observation {
        request_id: String,
        tool: String,
        preview: String,
        is_error: bool,
    },
    /// 最终回复
    MessageDone { text: String },
    /// Token 使用统计（本轮增量 + 累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        cumulative_total: u64,
    },
    /// 错误
    Error { text: String },
}
