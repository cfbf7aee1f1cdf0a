//! 动作参数 Schema 与校验
//!
//! 每个 ActionContract 声明一组有名字、有类型、可选/必填的参数（InputSchema）。
//! Dispatcher 在调用 provider 前用 validate 校验 arguments：纯函数、无隐藏状态，
//! 同一 (schema, arguments) 多次校验结果一致。
//!
//! 另提供推理模型回复格式的 JSON Schema（schemars 自动生成），注入 system prompt 以减少格式错误。

use std::collections::HashMap;
use std::fmt;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// 参数类型；Image 为非空字符串形式的影像引用
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Image,
}

impl ParamType {
    fn accepts(self, v: &Value) -> bool {
        match self {
            ParamType::String => v.is_string(),
            ParamType::Integer => v.is_i64() || v.is_u64(),
            ParamType::Number => v.is_number(),
            ParamType::Boolean => v.is_boolean(),
            ParamType::Array => v.is_array(),
            ParamType::Object => v.is_object(),
            ParamType::Image => v.as_str().map_or(false, |s| !s.trim().is_empty()),
        }
    }

    /// 对应的 JSON Schema type
    fn json_type(self) -> &'static str {
        match self {
            ParamType::String | ParamType::Image => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::Image => "image reference",
            other => other.json_type(),
        };
        f.write_str(s)
    }
}

/// JSON 值的类型名（用于错误描述）
fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(s) if s.trim().is_empty() => "empty string",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 单个参数声明
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// 参数校验错误：描述具体字段的缺失或类型不符
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: ParamType,
        found: &'static str,
    },

    #[error("unexpected field '{0}'")]
    UnexpectedField(String),
}

/// 动作输入 Schema：按声明顺序排列的参数列表
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 校验参数：先按声明顺序检查必填与类型，再按键名排序检查未声明字段；返回第一处违例。
    /// 可选参数显式传 null 视为未提供。
    pub fn validate(&self, args: &Value) -> Result<(), ValidationError> {
        let obj = args
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(value_kind(args)))?;
        self.validate_map(obj)
    }

    pub fn validate_map(&self, obj: &Map<String, Value>) -> Result<(), ValidationError> {
        for spec in &self.params {
            match obj.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ValidationError::MissingField(spec.name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(v) if !spec.ty.accepts(v) => {
                    return Err(ValidationError::TypeMismatch {
                        field: spec.name.clone(),
                        expected: spec.ty,
                        found: value_kind(v),
                    });
                }
                Some(_) => {}
            }
        }
        let mut extra: Vec<&String> = obj.keys().filter(|k| self.get(k).is_none()).collect();
        extra.sort();
        if let Some(k) = extra.first() {
            return Err(ValidationError::UnexpectedField((*k).clone()));
        }
        Ok(())
    }

    /// 转为 JSON Schema 对象（供推理模型理解参数格式）
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = json!({ "type": p.ty.json_type() });
            let desc = match (p.ty, p.description.is_empty()) {
                (ParamType::Image, true) => "image reference".to_string(),
                (ParamType::Image, false) => format!("{} (image reference)", p.description),
                (_, _) => p.description.clone(),
            };
            if !desc.is_empty() {
                prop["description"] = Value::String(desc);
            }
            properties.insert(p.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}

/// 推理模型回复格式（仅用于 Schema 生成，与 react::planner 的解析结构一致）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct OracleReplyFormat {
    /// 给用户的文字（最终回答、澄清问题或调用工具前的简短思考）
    pub text: Option<String>,
    /// 要执行的动作；为空表示本轮结束
    pub actions: Vec<ActionCallFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionCallFormat {
    /// 本轮内唯一的请求 id，如 "1"、"2"
    pub id: String,
    /// 动作名，必须是 Available actions 中的一个
    pub action: String,
    /// 动作参数，遵循该动作的参数 schema
    pub arguments: HashMap<String, serde_json::Value>,
}

/// 返回推理模型回复格式的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(OracleReplyFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_schema() -> InputSchema {
        InputSchema::new()
            .param(ParamSpec::required("image", ParamType::Image))
            .param(ParamSpec::optional("top_k", ParamType::Integer))
    }

    #[test]
    fn test_valid_arguments() {
        let s = classify_schema();
        assert!(s.validate(&json!({"image": "cxr.png"})).is_ok());
        assert!(s.validate(&json!({"image": "cxr.png", "top_k": 3})).is_ok());
        assert!(s.validate(&json!({"image": "cxr.png", "top_k": null})).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let err = classify_schema().validate(&json!({"top_k": 3})).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("image".into()));
        assert_eq!(err.to_string(), "missing required field 'image'");
    }

    #[test]
    fn test_type_mismatch() {
        let err = classify_schema()
            .validate(&json!({"image": "a.png", "top_k": "three"}))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                field: "top_k".into(),
                expected: ParamType::Integer,
                found: "string",
            }
        );
        let err = classify_schema().validate(&json!({"image": "  "})).unwrap_err();
        assert!(err.to_string().contains("expected image reference, got empty string"));
    }

    #[test]
    fn test_integer_rejects_float() {
        let err = classify_schema()
            .validate(&json!({"image": "a.png", "top_k": 1.5}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { found: "number", .. }));
    }

    #[test]
    fn test_unexpected_and_non_object() {
        let s = classify_schema();
        assert_eq!(
            s.validate(&json!({"image": "a.png", "zeta": 1, "alpha": 2})).unwrap_err(),
            ValidationError::UnexpectedField("alpha".into())
        );
        assert_eq!(
            s.validate(&json!(["a.png"])).unwrap_err(),
            ValidationError::NotAnObject("array")
        );
    }

    #[test]
    fn test_validation_is_repeatable() {
        let s = classify_schema();
        let args = json!({"top_k": "x"});
        let first = s.validate(&args);
        for _ in 0..5 {
            assert_eq!(s.validate(&args), first);
        }
    }

    #[test]
    fn test_json_schema_shape() {
        let v = classify_schema().to_json_schema();
        assert_eq!(v["type"], "object");
        assert_eq!(v["properties"]["image"]["type"], "string");
        assert_eq!(v["properties"]["top_k"]["type"], "integer");
        assert_eq!(v["required"], json!(["image"]));
    }

    #[test]
    fn test_param_spec_from_toml_style() {
        let spec: ParamSpec =
            serde_json::from_value(json!({"name": "question", "type": "string"})).unwrap();
        assert!(spec.required);
        assert_eq!(spec.ty, ParamType::String);
    }

    #[test]
    fn test_reply_schema_mentions_actions() {
        let s = tool_call_schema_json();
        assert!(s.contains("actions"));
        assert!(s.contains("arguments"));
    }
}
