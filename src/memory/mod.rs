//! 记忆层：会话账本（只追加）、对话消息与账本持久化

pub mod conversation;
pub mod ledger;
pub mod persistence;

pub use conversation::{Message, Role};
pub use ledger::{
    ActionRequest, ActionResultEntry, Entry, ImageRef, Ledger, LedgerError, OracleEntry,
};
pub use persistence::LedgerPersistence;
