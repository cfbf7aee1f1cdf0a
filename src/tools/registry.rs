//! 动作目录（Action Catalog）
//!
//! 所有能力提供方实现 Tool trait（name / description / input_schema / invoke），
//! 注册为 ActionContract 后由 ActionCatalog 按名查找。目录在进程启动时构建，之后只读，
//! 以 Arc<ActionCatalog> 在多个会话间共享，并发 lookup / list_all 无需加锁。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tools::InputSchema;

/// Provider 成功返回的内容：文本或结构化数据
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutput {
    Text(String),
    Structured(Value),
}

impl ActionOutput {
    /// 渲染为写入账本的文本：结构化数据序列化为紧凑 JSON，字符串原样返回
    pub fn render(&self) -> String {
        match self {
            ActionOutput::Text(s) => s.clone(),
            ActionOutput::Structured(Value::String(s)) => s.clone(),
            ActionOutput::Structured(v) => v.to_string(),
        }
    }
}

impl From<String> for ActionOutput {
    fn from(s: String) -> Self {
        ActionOutput::Text(s)
    }
}

impl From<&str> for ActionOutput {
    fn from(s: &str) -> Self {
        ActionOutput::Text(s.to_string())
    }
}

impl From<Value> for ActionOutput {
    fn from(v: Value) -> Self {
        ActionOutput::Structured(v)
    }
}

/// 工具 trait：统一的调用签名 (arguments) -> result | failure
///
/// invoke 的 Err 为失败信息（超时、内部错误、依赖不可达等），由 Dispatcher 转为 is_error 结果；
/// 实现方可能与其它工具并发调用。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（推理模型请求中的 "action" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供推理模型判断用途，不会被解析）
    fn description(&self) -> &str;

    /// 参数 Schema；默认无参数
    fn input_schema(&self) -> InputSchema {
        InputSchema::default()
    }

    /// 执行工具；args 已通过 input_schema 校验
    async fn invoke(&self, args: Value) -> Result<ActionOutput, String>;
}

/// 动作契约：名称、描述、参数 Schema 与调用句柄
#[derive(Clone)]
pub struct ActionContract {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    handle: Arc<dyn Tool>,
}

impl ActionContract {
    /// 从工具实例构建契约（名称、描述、Schema 取自工具本身）
    pub fn from_tool(tool: impl Tool + 'static) -> Self {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            handle: tool,
        }
    }

    pub async fn invoke(&self, args: Value) -> Result<ActionOutput, String> {
        self.handle.invoke(args).await
    }

    /// 序列化为 name / description / parameters 三元组
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.input_schema.to_json_schema(),
        })
    }
}

impl fmt::Debug for ActionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContract")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("DuplicateAction: {0}")]
    DuplicateAction(String),

    #[error("UnknownAction: {0}")]
    UnknownAction(String),
}

/// 动作目录：按名称存储契约，list_all 保持注册顺序
#[derive(Default, Debug)]
pub struct ActionCatalog {
    contracts: HashMap<String, ActionContract>,
    order: Vec<String>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册契约；同名已存在时返回 DuplicateAction，目录不变
    pub fn register(&mut self, contract: ActionContract) -> Result<(), CatalogError> {
        if self.contracts.contains_key(&contract.name) {
            return Err(CatalogError::DuplicateAction(contract.name));
        }
        self.order.push(contract.name.clone());
        self.contracts.insert(contract.name.clone(), contract);
        Ok(())
    }

    /// register 的便捷形式
    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<(), CatalogError> {
        self.register(ActionContract::from_tool(tool))
    }

    pub fn lookup(&self, name: &str) -> Result<&ActionContract, CatalogError> {
        self.contracts
            .get(name)
            .ok_or_else(|| CatalogError::UnknownAction(name.to_string()))
    }

    /// 全量目录（每轮推理都呈现全部动作，由推理模型自行判断相关性）
    pub fn list_all(&self) -> Vec<&ActionContract> {
        self.order
            .iter()
            .filter_map(|n| self.contracts.get(n))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 生成目录 JSON（name / description / parameters），拼入 prompt 的 Available actions 段落
    pub fn to_schema_json(&self) -> String {
        let actions: Vec<Value> = self.list_all().iter().map(|c| c.to_json()).collect();
        serde_json::to_string_pretty(&actions).unwrap_or_else(|_| "[]".to_string())
    }
}
