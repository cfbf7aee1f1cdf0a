//! 动作调度器（Action Dispatcher）
//!
//! 对一批 ActionRequest 逐个：查目录 → 校验参数 → 在并发许可、可选全局超时、panic 捕获与取消令牌下调用 provider。
//! 任何失败都转为 is_error 的 ActionResultEntry，不会有错误穿出 dispatch；
//! 同批请求并发执行，结果按请求顺序返回（按 id 关联，而非完成顺序）。
//! 每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{ActionError, TaskScheduler};
use crate::memory::{ActionRequest, ActionResultEntry};
use crate::tools::{ActionCatalog, ActionOutput};

/// 动作调度器：持有只读目录、并发调度器与可选的单次调用超时
pub struct ActionDispatcher {
    catalog: Arc<ActionCatalog>,
    scheduler: TaskScheduler,
    timeout: Option<Duration>,
}

impl ActionDispatcher {
    pub fn new(catalog: Arc<ActionCatalog>, scheduler: TaskScheduler) -> Self {
        Self {
            catalog,
            scheduler,
            timeout: None,
        }
    }

    /// 设置单次调用的外层超时（0 表示不设）；provider 自身的超时仍优先
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn catalog(&self) -> &Arc<ActionCatalog> {
        &self.catalog
    }

    /// 执行一批请求；返回与 requests 一一对应、顺序一致的结果
    pub async fn dispatch(
        &self,
        requests: &[ActionRequest],
        cancel: &CancellationToken,
    ) -> Vec<ActionResultEntry> {
        join_all(requests.iter().map(|r| self.dispatch_one(r, cancel))).await
    }

    async fn dispatch_one(
        &self,
        request: &ActionRequest,
        cancel: &CancellationToken,
    ) -> ActionResultEntry {
        let start = Instant::now();
        let result = self.run(request, cancel).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ActionError::UnknownAction(_)) => "unknown_action",
            Err(ActionError::ArgumentValidation { .. }) => "invalid_arguments",
            Err(ActionError::ProviderFailure { .. }) => "error",
            Err(ActionError::Timeout { .. }) => "timeout",
            Err(ActionError::Cancelled(_)) => "cancelled",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "request_id": request.id,
            "tool": request.action_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&request.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => ActionResultEntry::ok(&request.id, output.render()),
            Err(e) => ActionResultEntry::error(&request.id, e.to_string()),
        }
    }

    async fn run(
        &self,
        request: &ActionRequest,
        cancel: &CancellationToken,
    ) -> Result<ActionOutput, ActionError> {
        let action = request.action_name.as_str();
        let contract = self
            .catalog
            .lookup(action)
            .map_err(|_| ActionError::UnknownAction(action.to_string()))?;
        contract
            .input_schema
            .validate_map(&request.arguments)
            .map_err(|source| ActionError::ArgumentValidation {
                action: action.to_string(),
                source,
            })?;

        if cancel.is_cancelled() {
            return Err(ActionError::Cancelled(action.to_string()));
        }

        let args = Value::Object(request.arguments.clone());
        let invocation = async {
            let _permit = self.scheduler.acquire_action().await;
            // provider panic 同样视为失败，不能穿出调度边界
            let call = AssertUnwindSafe(contract.invoke(args)).catch_unwind();
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(r) => r,
                    Err(_) => {
                        return Err(ActionError::Timeout {
                            action: action.to_string(),
                            secs: limit.as_secs(),
                        })
                    }
                },
                None => call.await,
            };
            match outcome {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(message)) => Err(ActionError::ProviderFailure {
                    action: action.to_string(),
                    message,
                }),
                Err(panic) => Err(ActionError::ProviderFailure {
                    action: action.to_string(),
                    message: panic_message(panic.as_ref()),
                }),
            }
        };

        tokio::select! {
            r = invocation => r,
            _ = cancel.cancelled() => Err(ActionError::Cancelled(action.to_string())),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("provider panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("provider panicked: {s}")
    } else {
        "provider panicked".to_string()
    }
}

fn args_preview(args: &serde_json::Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::tools::{InputSchema, ParamSpec, ParamType, Tool};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "classify"
        }

        fn description(&self) -> &str {
            "classify"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::new().param(ParamSpec::required("image", ParamType::Image))
        }

        async fn invoke(&self, _args: Value) -> Result<ActionOutput, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"finding": "cardiomegaly"}).into())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "report"
        }

        fn description(&self) -> &str {
            "report"
        }

        async fn invoke(&self, _args: Value) -> Result<ActionOutput, String> {
            Err("model server unreachable".to_string())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "ground"
        }

        fn description(&self) -> &str {
            "ground"
        }

        async fn invoke(&self, _args: Value) -> Result<ActionOutput, String> {
            panic!("index out of range")
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _args: Value) -> Result<ActionOutput, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    fn dispatcher(calls: Arc<AtomicUsize>) -> ActionDispatcher {
        let mut catalog = ActionCatalog::new();
        catalog.register_tool(Counting { calls }).unwrap();
        catalog.register_tool(Failing).unwrap();
        catalog.register_tool(Panicking).unwrap();
        catalog.register_tool(Sleepy).unwrap();
        ActionDispatcher::new(Arc::new(catalog), TaskScheduler::default())
    }

    fn req(id: &str, name: &str, args: Value) -> ActionRequest {
        ActionRequest::new(id, name, args.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_success_and_unknown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());
        let token = CancellationToken::new();
        let out = d
            .dispatch(
                &[
                    req("1", "classify", json!({"image": "a.png"})),
                    req("2", "segment", json!({})),
                ],
                &token,
            )
            .await;
        assert_eq!(out.len(), 2);
        assert!(!out[0].is_error);
        assert_eq!(out[0].content, "{\"finding\":\"cardiomegaly\"}");
        assert!(out[1].is_error);
        assert_eq!(out[1].content, "UnknownAction: segment");
        assert_eq!(out[1].request_id, "2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_skips_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());
        let out = d
            .dispatch(&[req("1", "classify", json!({}))], &CancellationToken::new())
            .await;
        assert!(out[0].is_error);
        assert!(out[0].content.starts_with("ArgumentValidationError: classify"));
        assert!(out[0].content.contains("'image'"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_and_panic_become_results() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let out = d
            .dispatch(
                &[req("a", "report", json!({})), req("b", "ground", json!({}))],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out[0].content, "ProviderFailure: report: model server unreachable");
        assert!(out[1].is_error);
        assert!(out[1].content.contains("index out of range"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0))).with_timeout_secs(2);
        let out = d
            .dispatch(&[req("1", "slow", json!({}))], &CancellationToken::new())
            .await;
        assert!(out[0].is_error);
        assert_eq!(out[0].content, "ProviderFailure: slow: timed out after 2s");
    }

    #[tokio::test]
    async fn test_cancel_marks_in_flight_actions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let out = d
            .dispatch(
                &[
                    req("1", "classify", json!({"image": "a.png"})),
                    req("2", "slow", json!({})),
                ],
                &token,
            )
            .await;
        assert_eq!(out.len(), 2);
        assert!(!out[0].is_error);
        assert_eq!(out[1].content, "Cancelled: slow");
    }
}
