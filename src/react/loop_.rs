//! ReAct 主循环
//!
//! 显式状态机 INIT -> REASON -> (DISPATCH -> REASON)* -> DONE，驱动一次用户提问：
//! 每个状态只向账本追加条目，从不修改已有条目。
//! 取消：REASON 前检查；进行中的推理被放弃且不写入任何条目；进行中的动作批次完整落账（未完成者记为 Cancelled）后返回。
//! 可选 event_tx：向 CLI 等前端推送 Thinking / ToolCall / Observation / MessageDone。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, LoopState};
use crate::memory::{Entry, ImageRef, Ledger};
use crate::react::{route, Planner, ReactEvent, Route};
use crate::tools::ActionDispatcher;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// ReAct 循环执行结果：最终回复与本次执行的动作轮数
#[derive(Debug, Clone, PartialEq)]
pub struct ReactResult {
    pub response: String,
    pub iterations: usize,
}

/// ReAct 会话配置
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub dispatcher: &'a ActionDispatcher,
    pub cancel_token: CancellationToken,
    /// 每次提问最多的动作轮数；None 表示不限制
    pub max_iterations: Option<usize>,
    /// 账本为空时写入的 System 条目
    pub system_prompt: Option<&'a str>,
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        dispatcher: &'a ActionDispatcher,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            cancel_token,
            max_iterations: None,
            system_prompt: None,
            event_tx: None,
        }
    }

    /// 0 表示不限制
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = (max > 0).then_some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<&'a str>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: ReactEvent) {
        if let Some(t) = self.event_tx {
            let _ = t.send(ev);
        }
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 执行一次提问
///
/// 推理模型不可达返回 AgentError::Oracle，取消返回 AgentError::Cancelled；
/// 二者之前已写入的条目保留在账本中，会话可以继续提问。
pub async fn react_loop(
    session: &ReactSession<'_>,
    ledger: &mut Ledger,
    query: &str,
    image_refs: Vec<ImageRef>,
) -> Result<ReactResult, AgentError> {
    let planner = session.planner;
    let dispatcher = session.dispatcher;
    let cancel = &session.cancel_token;

    let (init_prompt, init_completion, _) = planner.token_usage();
    let mut user_entry = Some(Entry::user(query, image_refs));
    let mut rounds = 0usize;
    let mut step = 0usize;
    let mut state = LoopState::Init;

    loop {
        tracing::debug!(state = state.name(), rounds, "react");
        state = match state {
            LoopState::Init => {
                if ledger.is_empty() {
                    if let Some(p) = session.system_prompt {
                        ledger.append(Entry::system(p))?;
                    }
                }
                if let Some(entry) = user_entry.take() {
                    ledger.append(entry)?;
                }
                LoopState::Reason
            }

            LoopState::Reason => {
                if cancel.is_cancelled() {
                    session.emit(ReactEvent::Error {
                        text: "Cancelled by user".to_string(),
                    });
                    return Err(AgentError::Cancelled);
                }
                step += 1;
                session.emit(ReactEvent::StepUpdate {
                    step,
                    max_steps: session.max_iterations.map(|m| m + 1),
                });
                session.emit(ReactEvent::Thinking);

                let reasoning = planner.reason(ledger.snapshot(), dispatcher.catalog());
                let entry = tokio::select! {
                    r = reasoning => match r {
                        Ok(entry) => entry,
                        Err(e) => {
                            session.emit(ReactEvent::Error { text: e.to_string() });
                            return Err(e);
                        }
                    },
                    _ = cancel.cancelled() => {
                        session.emit(ReactEvent::Error { text: "Cancelled by user".to_string() });
                        return Err(AgentError::Cancelled);
                    }
                };

                let text = entry.text.clone().unwrap_or_default();
                let requests = entry.action_requests.clone();
                ledger.append(Entry::Oracle(entry))?;

                match route(ledger.latest()) {
                    Route::Continue => {
                        if !text.is_empty() {
                            session.emit(ReactEvent::ThinkingContent { text });
                        }
                        match session.max_iterations {
                            Some(max) if rounds >= max => {
                                tracing::warn!(max, "Iteration limit reached with pending actions");
                                LoopState::Done(format!(
                                    "IterationLimit: stopped after {} action rounds without a final answer",
                                    rounds
                                ))
                            }
                            _ => LoopState::Dispatch(requests),
                        }
                    }
                    Route::Finish => LoopState::Done(text),
                }
            }

            LoopState::Dispatch(requests) => {
                rounds += 1;
                for r in &requests {
                    session.emit(ReactEvent::ToolCall {
                        request_id: r.id.clone(),
                        tool: r.action_name.clone(),
                        args: serde_json::Value::Object(r.arguments.clone()),
                    });
                }
                let results = dispatcher.dispatch(&requests, cancel).await;
                for r in &results {
                    let tool = ledger
                        .request(&r.request_id)
                        .map(|req| req.action_name.clone())
                        .unwrap_or_default();
                    session.emit(ReactEvent::Observation {
                        request_id: r.request_id.clone(),
                        tool,
                        preview: preview(&r.content),
                        is_error: r.is_error,
                    });
                }
                ledger.append_batch(results)?;

                if cancel.is_cancelled() {
                    session.emit(ReactEvent::Error {
                        text: "Cancelled by user".to_string(),
                    });
                    return Err(AgentError::Cancelled);
                }
                LoopState::Reason
            }

            LoopState::Done(text) => {
                let (cur_prompt, cur_completion, cur_total) = planner.token_usage();
                session.emit(ReactEvent::TokenUsage {
                    prompt_tokens: cur_prompt.saturating_sub(init_prompt),
                    completion_tokens: cur_completion.saturating_sub(init_completion),
                    cumulative_total: cur_total,
                });
                session.emit(ReactEvent::MessageDone { text: text.clone() });
                return Ok(ReactResult {
                    response: text,
                    iterations: rounds,
                });
            }
        };
    }
}
