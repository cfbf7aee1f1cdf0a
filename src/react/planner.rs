//! Planner：推理步骤（Reasoning Step）
//!
//! 把账本快照与动作目录渲染为对话消息，调用推理模型，并把原始输出解析为 OracleEntry。
//! 输出格式：纯文本，或 JSON 对象 {"text"?, "actions": [{"id"?, "action", "arguments"}]}，
//! JSON 可裸露、放在 ```json 代码块中，或跟在一段说明文字之后（说明文字作为 text）。
//! 解析失败不报错，降级为一条 "OracleParseFailure: ..." 文本条目，由调用方结束本轮。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{ActionRequest, Entry, Message, OracleEntry};
use crate::tools::{tool_call_schema_json, ActionCatalog};

/// 账本中没有 System 条目时使用的基础指令
const DEFAULT_INSTRUCTIONS: &str = "You are a medical imaging assistant. \
Answer the user's question about the provided images, calling the available actions when they help.";

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    id: Option<Value>,
    action: String,
    #[serde(default)]
    arguments: Value,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
    })
}

/// 解析推理模型原始输出；请求 id 缺失时留空，由 normalize_request_ids 补齐
///
/// 只有带 "actions" 或 "text" 键的 JSON 对象才视为回复格式；其它 JSON（如结构化的最终结论）按普通文本原样保留。
pub fn parse_oracle_output(output: &str) -> Result<OracleEntry, AgentError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(AgentError::JsonParseError("empty reply".to_string()));
    }

    let (envelope, prose) = match find_envelope(trimmed) {
        Some(found) => found,
        None => {
            if let Some(err) = malformed_actions(trimmed) {
                return Err(err);
            }
            return Ok(OracleEntry::text(trimmed));
        }
    };

    let reply: RawReply = serde_json::from_value(envelope)
        .map_err(|e| AgentError::JsonParseError(format!("invalid reply object: {}", e)))?;

    let mut requests = Vec::with_capacity(reply.actions.len());
    for a in reply.actions {
        let name = a.action.trim();
        if name.is_empty() {
            return Err(AgentError::JsonParseError("action name is empty".to_string()));
        }
        let arguments = match a.arguments {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => {
                return Err(AgentError::JsonParseError(format!(
                    "arguments for '{}' must be an object, got {}",
                    name, other
                )))
            }
        };
        let id = match a.id {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        requests.push(ActionRequest::new(id, name, arguments));
    }

    let text = reply
        .text
        .filter(|t| !t.trim().is_empty())
        .or_else(|| (!prose.is_empty()).then_some(prose));
    if text.is_none() && requests.is_empty() {
        return Err(AgentError::JsonParseError(
            "reply has neither text nor actions".to_string(),
        ));
    }
    Ok(OracleEntry::with_actions(text, requests))
}

fn is_envelope(v: &Value) -> bool {
    v.as_object()
        .map_or(false, |o| o.contains_key("actions") || o.contains_key("text"))
}

/// 定位回复对象：先找 ```json 代码块，再找说明文字之后延伸到末尾的 JSON；返回对象与其余文字
fn find_envelope(s: &str) -> Option<(Value, String)> {
    for caps in fence_re().captures_iter(s) {
        let (Some(whole), Some(json)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        match serde_json::from_str::<Value>(json.as_str()) {
            Ok(v) if is_envelope(&v) => {
                let prose = format!("{}{}", &s[..whole.start()], &s[whole.end()..]);
                return Some((v, prose.trim().to_string()));
            }
            _ => {}
        }
    }

    if !s.ends_with('}') {
        return None;
    }
    s.match_indices('{').find_map(|(start, _)| {
        match serde_json::from_str::<Value>(&s[start..]) {
            Ok(v) if is_envelope(&v) => Some((v, s[..start].trim().to_string())),
            _ => None,
        }
    })
}

/// 含 "actions" 键却无法解析为对象时报告解析失败，而不是当作普通文本
fn malformed_actions(s: &str) -> Option<AgentError> {
    let key = s.find("\"actions\"")?;
    let start = s[..key].rfind('{')?;
    let json = &s[start..];
    let detail = match serde_json::from_str::<Value>(json) {
        Err(e) => e.to_string(),
        Ok(_) => "action object is not a valid reply".to_string(),
    };
    Some(AgentError::JsonParseError(format!("{}: {}", detail, preview(json))))
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 补齐缺失的请求 id，并对与账本已有 id 或同批 id 冲突者重新编号（`<id>-<n>`）
pub fn normalize_request_ids(mut entry: OracleEntry, history: &[Entry]) -> OracleEntry {
    let mut used: HashSet<String> = history
        .iter()
        .filter_map(Entry::as_oracle)
        .flat_map(|o| o.action_requests.iter().map(|r| r.id.clone()))
        .collect();
    let mut next = used.len() + 1;

    for req in entry.action_requests.iter_mut() {
        if req.id.is_empty() {
            while used.contains(&format!("call-{}", next)) {
                next += 1;
            }
            req.id = format!("call-{}", next);
            next += 1;
        } else if used.contains(&req.id) {
            let mut n = 2;
            while used.contains(&format!("{}-{}", req.id, n)) {
                n += 1;
            }
            tracing::debug!("Re-keying duplicate request id {} -> {}-{}", req.id, req.id, n);
            req.id = format!("{}-{}", req.id, n);
        }
        used.insert(req.id.clone());
    }
    entry
}

/// 把 Oracle 条目重新编码为回复格式，作为 assistant 历史消息
fn encode_oracle(o: &OracleEntry) -> String {
    if !o.has_actions() {
        return o.text.clone().unwrap_or_default();
    }
    let actions: Vec<Value> = o
        .action_requests
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id,
                "action": r.action_name,
                "arguments": r.arguments,
            })
        })
        .collect();
    let mut reply = serde_json::json!({ "actions": actions });
    if let Some(t) = &o.text {
        reply["text"] = Value::String(t.clone());
    }
    reply.to_string()
}

/// Planner：持有推理模型客户端，负责 reason（账本快照 -> OracleEntry）
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// system 消息：基础指令 + 动作目录 + 回复格式
    pub fn system_message(&self, history: &[Entry], catalog: &ActionCatalog) -> String {
        let base = match history.first() {
            Some(Entry::System { content }) => content.as_str(),
            _ => DEFAULT_INSTRUCTIONS,
        };
        if catalog.is_empty() {
            return format!("{}\n\nNo actions are available; answer directly in plain text.", base);
        }
        format!(
            "{}\n\n## Available actions\n{}\n\n## Reply format\n\
             To answer, reply in plain text. To call actions, reply with one JSON object matching this schema \
             (actions in the same reply run concurrently; results come back as observations tagged with the request id):\n{}",
            base,
            catalog.to_schema_json(),
            tool_call_schema_json()
        )
    }

    /// 账本条目 -> 对话消息
    pub fn to_messages(&self, history: &[Entry], catalog: &ActionCatalog) -> Vec<Message> {
        let mut action_of: HashMap<&str, &str> = HashMap::new();
        let mut messages = vec![Message::system(self.system_message(history, catalog))];
        for entry in history {
            match entry {
                Entry::System { .. } => {}
                Entry::User {
                    content,
                    image_refs,
                } => messages.push(Message::user_with_images(content.clone(), image_refs.clone())),
                Entry::Oracle(o) => {
                    for r in &o.action_requests {
                        action_of.insert(r.id.as_str(), r.action_name.as_str());
                    }
                    messages.push(Message::assistant(encode_oracle(o)));
                }
                Entry::ActionResult(r) => {
                    let action = action_of.get(r.request_id.as_str()).copied().unwrap_or("?");
                    let status = if r.is_error { " failed" } else { "" };
                    messages.push(Message::user(format!(
                        "Observation [{}] {}{}: {}",
                        r.request_id, action, status, r.content
                    )));
                }
            }
        }
        messages
    }

    /// 一次推理：渲染 prompt -> 调用推理模型 -> 解析 -> 规范化请求 id
    ///
    /// 推理模型不可达时返回 AgentError::Oracle；输出无法解析时返回 OracleParseFailure 文本条目。
    pub async fn reason(
        &self,
        history: &[Entry],
        catalog: &ActionCatalog,
    ) -> Result<OracleEntry, AgentError> {
        let messages = self.to_messages(history, catalog);
        let raw = self.llm.complete(&messages).await?;
        let entry = match parse_oracle_output(&raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Cannot parse oracle reply: {}", e);
                OracleEntry::text(e.to_string())
            }
        };
        Ok(normalize_request_ids(entry, history))
    }
}
