//! 账本持久化
//!
//! 将 Ledger 写入/从 JSON Lines 文件加载（每行一个 Entry），用于会话结束后外部留存或跨进程续聊。
//! 加载时通过 Ledger::from_entries 重新校验全部不变量。

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::memory::{Entry, Ledger};

/// 单文件 JSONL 持久化
#[derive(Debug)]
pub struct LedgerPersistence {
    path: PathBuf,
}

impl LedgerPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 从 JSONL 文件加载账本；文件不存在时返回空账本
    pub fn load(&self) -> anyhow::Result<Ledger> {
        if !self.path.exists() {
            return Ok(Ledger::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read transcript {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: Entry = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid entry", self.path.display(), lineno + 1))?;
            entries.push(entry);
        }
        Ok(Ledger::from_entries(entries)?)
    }

    /// 整体写出账本；父目录不存在时自动创建
    pub fn save(&self, ledger: &Ledger) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&self.path)
            .with_context(|| format!("create transcript {}", self.path.display()))?;
        for entry in ledger.snapshot() {
            writeln!(file, "{}", serde_json::to_string(entry)?)?;
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ActionRequest, ActionResultEntry, OracleEntry};

    #[test]
    fn test_save_and_load_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerPersistence::new(dir.path().join("sessions/s1.jsonl"));

        let mut ledger = Ledger::new();
        ledger.append(Entry::system("sys")).unwrap();
        ledger
            .append(Entry::user("what is in this film?", vec!["cxr.png".into()]))
            .unwrap();
        ledger
            .append(Entry::Oracle(OracleEntry::with_actions(
                Some("classifying".into()),
                vec![ActionRequest::new("1", "classify", Default::default())],
            )))
            .unwrap();
        ledger
            .append_batch(vec![ActionResultEntry::ok("1", "{\"effusion\":0.8}")])
            .unwrap();
        store.save(&ledger).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.snapshot(), ledger.snapshot());
        assert!(loaded.has_result("1"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerPersistence::new(dir.path().join("none.jsonl"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_rejects_corrupt_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(
            &path,
            "{\"kind\":\"action_result\",\"request_id\":\"7\",\"content\":\"x\",\"is_error\":false}\n",
        )
        .unwrap();
        assert!(LedgerPersistence::new(&path).load().is_err());
    }
}
