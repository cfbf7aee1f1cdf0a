//! 会话入口
//!
//! AgentComponents（Planner、ActionDispatcher、系统指令、循环上限）启动时构建一次，以 Arc 在多个会话间共享；
//! Session 持有自己的账本与取消监管，ask 对单次提问跑 ReAct 循环并返回最终回复。
//! 配置了会话记录时，每次提问后把账本写为 JSONL。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::core::{build_catalog, create_llm_from_config, AgentError, SessionSupervisor, TaskScheduler};
use crate::memory::{ImageRef, Ledger, LedgerPersistence};
use crate::react::{react_loop, Planner, ReactEvent, ReactSession};
use crate::tools::ActionDispatcher;

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub planner: Planner,
    pub dispatcher: ActionDispatcher,
    /// 新会话账本的 System 条目
    pub system_prompt: Option<String>,
    /// 每次提问最多的动作轮数，0 表示不限制
    pub max_iterations: usize,
}

impl AgentComponents {
    pub fn new(planner: Planner, dispatcher: ActionDispatcher) -> Self {
        Self {
            planner,
            dispatcher,
            system_prompt: None,
            max_iterations: 10,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }
}

/// 从配置创建 Agent 组件；动作目录中有重名时返回 AgentError::Catalog
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg);
    let catalog = build_catalog(cfg)?;
    let dispatcher = ActionDispatcher::new(
        Arc::new(catalog),
        TaskScheduler::new(cfg.agent.max_concurrent_actions),
    )
    .with_timeout_secs(cfg.tools.tool_timeout_secs);

    Ok(AgentComponents::new(Planner::new(llm), dispatcher)
        .with_system_prompt(cfg.system_prompt())
        .with_max_iterations(cfg.agent.max_iterations))
}

/// 一个会话：账本 + 取消监管
pub struct Session {
    id: String,
    components: Arc<AgentComponents>,
    ledger: Ledger,
    supervisor: Arc<SessionSupervisor>,
    transcript: Option<LedgerPersistence>,
}

impl Session {
    pub fn new(components: Arc<AgentComponents>) -> Self {
        Self::resume(components, Ledger::new())
    }

    /// 在已有账本上继续（如从会话记录加载）
    pub fn resume(components: Arc<AgentComponents>, ledger: Ledger) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            components,
            ledger,
            supervisor: Arc::new(SessionSupervisor::new()),
            transcript: None,
        }
    }

    /// 每次提问后把账本写入该文件
    pub fn with_transcript(mut self, transcript: LedgerPersistence) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// 外部取消当前提问：supervisor().cancel()
    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    pub async fn ask(&mut self, query: &str, image_refs: Vec<ImageRef>) -> Result<String, AgentError> {
        self.run(query, image_refs, None).await
    }

    /// 同 ask，并通过 event_tx 推送过程事件
    pub async fn ask_with_events(
        &mut self,
        query: &str,
        image_refs: Vec<ImageRef>,
        event_tx: &UnboundedSender<ReactEvent>,
    ) -> Result<String, AgentError> {
        self.run(query, image_refs, Some(event_tx)).await
    }

    async fn run(
        &mut self,
        query: &str,
        image_refs: Vec<ImageRef>,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<String, AgentError> {
        let components = Arc::clone(&self.components);
        let token = self.supervisor.begin_turn();
        let mut session = ReactSession::new(&components.planner, &components.dispatcher, token)
            .with_max_iterations(components.max_iterations)
            .with_system_prompt(components.system_prompt.as_deref());
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }

        tracing::info!(session = %self.id, images = image_refs.len(), "New question");
        let result = react_loop(&session, &mut self.ledger, query, image_refs).await;
        self.supervisor.end_turn();

        if let Some(t) = &self.transcript {
            if let Err(e) = t.save(&self.ledger) {
                tracing::warn!("Cannot save transcript {}: {:#}", t.path().display(), e);
            }
        }

        match &result {
            Ok(r) => tracing::info!(session = %self.id, iterations = r.iterations, "Answered"),
            Err(e) => tracing::warn!(session = %self.id, "Turn ended with error: {}", e),
        }
        result.map(|r| r.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_session_round_trip() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.app.system_prompt = Some("You are a test assistant.".to_string());
        let components = Arc::new(create_agent_components(&cfg).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let mut session =
            Session::new(components.clone()).with_transcript(LedgerPersistence::new(&path));
        let answer = session.ask("hello", vec![]).await.unwrap();
        assert!(answer.contains("hello"));
        // System, User, Oracle(echo), ActionResult, Oracle(answer)
        assert_eq!(session.ledger().len(), 5);

        let restored = LedgerPersistence::new(&path).load().unwrap();
        assert_eq!(restored.snapshot(), session.ledger().snapshot());

        let mut resumed = Session::resume(components, restored);
        resumed.ask("again", vec![]).await.unwrap();
        assert_eq!(resumed.ledger().len(), 9);
        assert_ne!(resumed.id(), session.id());
    }
}
