//! Echo 工具（诊断 / Mock 模式用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ActionOutput, InputSchema, ParamSpec, ParamType, Tool};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged (for testing the action pipeline)."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new().param(ParamSpec::required("text", ParamType::String).describe("text to echo"))
    }

    async fn invoke(&self, args: Value) -> Result<ActionOutput, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(text.into())
    }
}
