//! 会话账本（Ledger）：只追加的有序对话记录
//!
//! 每个会话独占一个 Ledger，由编排循环单写者追加；条目一经写入不可修改或删除，
//! 纠错只能通过追加新条目（如错误结果）完成，推理模型因此能「看到」自己之前的错误。
//!
//! 追加时校验不变量：System 只能位于索引 0 且最多一条；ActionRequest.id 在整个账本内唯一；
//! 每条 ActionResult 必须引用更早 Oracle 条目中的请求，且同一请求只能有一个结果。
//! 校验失败时账本保持原样。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// 不透明的影像引用（本地路径、http(s) URL 或 data URL），编排层不解析其内容
pub type ImageRef = String;

/// 推理模型请求执行的一次动作
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub action_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(
        id: impl Into<String>,
        action_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            action_name: action_name.into(),
            arguments,
        }
    }
}

/// 推理模型的一轮输出：文本与动作请求可同时存在，但至少要有一项
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub action_requests: Vec<ActionRequest>,
}

impl OracleEntry {
    /// 纯文本输出（最终回答、澄清问题或解析失败诊断）
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            action_requests: Vec::new(),
        }
    }

    pub fn with_actions(text: Option<String>, action_requests: Vec<ActionRequest>) -> Self {
        Self {
            text,
            action_requests,
        }
    }

    pub fn has_actions(&self) -> bool {
        !self.action_requests.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, |t| t.trim().is_empty()) && self.action_requests.is_empty()
    }
}

/// 一次动作调用的结果，通过 request_id 与请求关联
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResultEntry {
    pub request_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ActionResultEntry {
    pub fn ok(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// 账本条目（带标签的联合类型）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    System {
        content: String,
    },
    User {
        content: String,
        #[serde(default)]
        image_refs: Vec<ImageRef>,
    },
    Oracle(OracleEntry),
    ActionResult(ActionResultEntry),
}

impl Entry {
    pub fn system(content: impl Into<String>) -> Self {
        Entry::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>, image_refs: Vec<ImageRef>) -> Self {
        Entry::User {
            content: content.into(),
            image_refs,
        }
    }

    pub fn as_oracle(&self) -> Option<&OracleEntry> {
        match self {
            Entry::Oracle(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("system entry must be the first and only system entry (attempted at index {0})")]
    SystemNotFirst(usize),

    #[error("oracle entry has neither text nor action requests")]
    EmptyOracleEntry,

    #[error("duplicate action request id: {0}")]
    DuplicateRequestId(String),

    #[error("action result references unknown request id: {0}")]
    UnknownRequestId(String),

    #[error("action request {0} already has a result")]
    DuplicateResult(String),
}

/// 只追加账本：entries 按追加顺序全序；另维护已出现的请求 id 与已应答 id 以 O(1) 校验
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    entries: Vec<Entry>,
    request_ids: HashSet<String>,
    answered: HashSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有条目重建账本（如从持久化加载），逐条按追加规则重新校验
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.append(entry)?;
        }
        Ok(ledger)
    }

    /// 追加单条；违反不变量时返回错误且账本不变
    pub fn append(&mut self, entry: Entry) -> Result<(), LedgerError> {
        self.check(&entry)?;
        self.commit(entry);
        Ok(())
    }

    /// 原子追加一批动作结果：先整体校验，全部通过才写入，不会出现半批
    pub fn append_batch(&mut self, results: Vec<ActionResultEntry>) -> Result<(), LedgerError> {
        let mut pending = HashSet::new();
        for r in &results {
            if !self.request_ids.contains(&r.request_id) {
                return Err(LedgerError::UnknownRequestId(r.request_id.clone()));
            }
            if self.answered.contains(&r.request_id) || !pending.insert(r.request_id.clone()) {
                return Err(LedgerError::DuplicateResult(r.request_id.clone()));
            }
        }
        for r in results {
            self.commit(Entry::ActionResult(r));
        }
        Ok(())
    }

    fn check(&self, entry: &Entry) -> Result<(), LedgerError> {
        match entry {
            Entry::System { .. } => {
                if !self.entries.is_empty() {
                    return Err(LedgerError::SystemNotFirst(self.entries.len()));
                }
            }
            Entry::User { .. } => {}
            Entry::Oracle(o) => {
                if o.is_empty() {
                    return Err(LedgerError::EmptyOracleEntry);
                }
                let mut batch = HashSet::new();
                for req in &o.action_requests {
                    if self.request_ids.contains(&req.id) || !batch.insert(req.id.as_str()) {
                        return Err(LedgerError::DuplicateRequestId(req.id.clone()));
                    }
                }
            }
            Entry::ActionResult(r) => {
                if !self.request_ids.contains(&r.request_id) {
                    return Err(LedgerError::UnknownRequestId(r.request_id.clone()));
                }
                if self.answered.contains(&r.request_id) {
                    return Err(LedgerError::DuplicateResult(r.request_id.clone()));
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, entry: Entry) {
        match &entry {
            Entry::Oracle(o) => {
                for req in &o.action_requests {
                    self.request_ids.insert(req.id.clone());
                }
            }
            Entry::ActionResult(r) => {
                self.answered.insert(r.request_id.clone());
            }
            _ => {}
        }
        self.entries.push(entry);
    }

    /// 只读视图；条目不可变，会话空闲时可安全迭代
    pub fn snapshot(&self) -> &[Entry] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_request(&self, id: &str) -> bool {
        self.request_ids.contains(id)
    }

    pub fn has_result(&self, id: &str) -> bool {
        self.answered.contains(id)
    }

    /// 按 id 查找请求（线性扫描）
    pub fn request(&self, id: &str) -> Option<&ActionRequest> {
        self.entries
            .iter()
            .filter_map(Entry::as_oracle)
            .flat_map(|o| o.action_requests.iter())
            .find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(id: &str, name: &str) -> ActionRequest {
        let args = json!({"image": "cxr.png"}).as_object().cloned().unwrap();
        ActionRequest::new(id, name, args)
    }

    #[test]
    fn test_system_only_first() {
        let mut ledger = Ledger::new();
        ledger.append(Entry::system("be careful")).unwrap();
        ledger.append(Entry::user("hi", vec![])).unwrap();
        let err = ledger.append(Entry::system("again")).unwrap_err();
        assert_eq!(err, LedgerError::SystemNotFirst(2));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_system_rejected_after_user() {
        let mut ledger = Ledger::new();
        ledger.append(Entry::user("hi", vec![])).unwrap();
        assert!(ledger.append(Entry::system("late")).is_err());
    }

    #[test]
    fn test_empty_oracle_rejected() {
        let mut ledger = Ledger::new();
        let err = ledger.append(Entry::Oracle(OracleEntry::default())).unwrap_err();
        assert_eq!(err, LedgerError::EmptyOracleEntry);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_result_requires_earlier_request() {
        let mut ledger = Ledger::new();
        let err = ledger
            .append(Entry::ActionResult(ActionResultEntry::ok("1", "x")))
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownRequestId("1".into()));

        ledger
            .append(Entry::Oracle(OracleEntry::with_actions(None, vec![req("1", "classify")])))
            .unwrap();
        ledger
            .append(Entry::ActionResult(ActionResultEntry::ok("1", "x")))
            .unwrap();
        let err = ledger
            .append(Entry::ActionResult(ActionResultEntry::ok("1", "y")))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateResult("1".into()));
        assert!(ledger.has_result("1"));
    }

    #[test]
    fn test_request_ids_unique_across_ledger() {
        let mut ledger = Ledger::new();
        ledger
            .append(Entry::Oracle(OracleEntry::with_actions(None, vec![req("a", "classify")])))
            .unwrap();
        let err = ledger
            .append(Entry::Oracle(OracleEntry::with_actions(None, vec![req("a", "vqa")])))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateRequestId("a".into()));

        let err = ledger
            .append(Entry::Oracle(OracleEntry::with_actions(
                None,
                vec![req("b", "vqa"), req("b", "classify")],
            )))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateRequestId("b".into()));
        assert!(!ledger.has_request("b"));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut ledger = Ledger::new();
        ledger
            .append(Entry::Oracle(OracleEntry::with_actions(
                None,
                vec![req("1", "classify"), req("2", "vqa")],
            )))
            .unwrap();
        let before = ledger.snapshot().to_vec();

        let bad = vec![ActionResultEntry::ok("1", "ok"), ActionResultEntry::ok("9", "??")];
        assert!(ledger.append_batch(bad).is_err());
        assert_eq!(ledger.snapshot(), before.as_slice());
        assert!(!ledger.has_result("1"));

        let dup = vec![ActionResultEntry::ok("1", "a"), ActionResultEntry::ok("1", "b")];
        assert_eq!(
            ledger.append_batch(dup).unwrap_err(),
            LedgerError::DuplicateResult("1".into())
        );
        assert_eq!(ledger.snapshot(), before.as_slice());

        let good = vec![ActionResultEntry::ok("1", "a"), ActionResultEntry::error("2", "b")];
        ledger.append_batch(good).unwrap();
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_failed_appends_never_mutate_history() {
        let mut ledger = Ledger::new();
        ledger.append(Entry::system("sys")).unwrap();
        ledger.append(Entry::user("q", vec!["a.png".into()])).unwrap();
        let before = ledger.snapshot().to_vec();

        let attempts = vec![
            Entry::system("x"),
            Entry::Oracle(OracleEntry::default()),
            Entry::ActionResult(ActionResultEntry::ok("zz", "x")),
        ];
        for e in attempts {
            assert!(ledger.append(e).is_err());
            assert_eq!(ledger.snapshot(), before.as_slice());
        }
    }

    #[test]
    fn test_from_entries_revalidates() {
        let entries = vec![
            Entry::user("q", vec![]),
            Entry::ActionResult(ActionResultEntry::ok("1", "x")),
        ];
        assert!(Ledger::from_entries(entries).is_err());
    }

    #[test]
    fn test_entry_serde_tagged() {
        let e = Entry::Oracle(OracleEntry::text("done"));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "oracle");
        assert_eq!(v["text"], "done");
        let back: Entry = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }
}
