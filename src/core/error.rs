//! 错误分类
//!
//! - ActionError：单个动作的失败（未知动作 / 参数校验 / provider 失败 / 超时 / 取消），
//!   在 Dispatcher 边界转为 is_error 结果写入账本，Display 即写入账本的诊断文本。
//! - AgentError：唯一会穿过编排循环边界的错误（推理模型不可达、取消、账本不变量被破坏、启动期目录冲突）。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::LedgerError;
use crate::tools::{CatalogError, ValidationError};

/// 编排循环运行过程中对调用方可见的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理模型传输层失败，不可恢复，不写入账本
    #[error("Oracle unavailable: {0}")]
    Oracle(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Ledger invariant violated: {0}")]
    Ledger(#[from] LedgerError),

    /// 启动期目录配置错误（DuplicateAction）
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// 推理模型输出解析失败；仅在 Reasoning Step 内部出现，会降级为文本条目
    #[error("OracleParseFailure: {0}")]
    JsonParseError(String),
}

/// 单个动作调用失败的原因（均会被转为 is_error 的结果条目，而非异常）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("UnknownAction: {0}")]
    UnknownAction(String),

    #[error("ArgumentValidationError: {action}: {source}")]
    ArgumentValidation {
        action: String,
        source: ValidationError,
    },

    #[error("ProviderFailure: {action}: {message}")]
    ProviderFailure { action: String, message: String },

    #[error("ProviderFailure: {action}: timed out after {secs}s")]
    Timeout { action: String, secs: u64 },

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_texts() {
        assert_eq!(
            ActionError::UnknownAction("segment".into()).to_string(),
            "UnknownAction: segment"
        );
        let e = ActionError::ArgumentValidation {
            action: "classify".into(),
            source: ValidationError::MissingField("image".into()),
        };
        assert_eq!(
            e.to_string(),
            "ArgumentValidationError: classify: missing required field 'image'"
        );
        let e = ActionError::Timeout {
            action: "vqa".into(),
            secs: 5,
        };
        assert_eq!(e.to_string(), "ProviderFailure: vqa: timed out after 5s");
    }

    #[test]
    fn test_agent_error_from_llm() {
        let err: AgentError = LlmError::Network("connection refused".into()).into();
        assert!(matches!(err, AgentError::Oracle(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
