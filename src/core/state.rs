//! 编排状态：INIT -> REASON -> (DISPATCH -> REASON)* -> DONE

use crate::memory::ActionRequest;

#[derive(Clone, Debug, PartialEq)]
pub enum LoopState {
    /// 写入 System（仅空账本）与 User 条目
    Init,
    /// 调用推理步骤并写入 Oracle 条目
    Reason,
    /// 执行最新 Oracle 条目中的动作请求
    Dispatch(Vec<ActionRequest>),
    /// 本轮结束，携带最终文本
    Done(String),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Init => "INIT",
            LoopState::Reason => "REASON",
            LoopState::Dispatch(_) => "DISPATCH",
            LoopState::Done(_) => "DONE",
        }
    }
}
