//! Router：根据账本最新条目决定继续还是结束

use crate::memory::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 最新条目是带动作请求的 Oracle 条目，需要执行动作
    Continue,
    Finish,
}

pub fn route(latest: Option<&Entry>) -> Route {
    match latest {
        Some(Entry::Oracle(o)) if o.has_actions() => Route::Continue,
        _ => Route::Finish,
    }
}
