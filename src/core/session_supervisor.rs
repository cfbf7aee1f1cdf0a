//! 会话监管：取消与关闭
//!
//! 根 token 代表整个会话（关闭时取消）；每次提问从根派生一个子 token，
//! cancel() 只取消当前这次提问，之后的提问使用新的子 token，会话可继续。
//! install_signal_handlers：Ctrl+C 在提问进行中时取消该提问，空闲时关闭会话；SIGTERM 直接关闭。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
    active: AtomicBool,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Mutex::new(root.child_token());
        Self {
            root,
            current,
            active: AtomicBool::new(false),
        }
    }

    /// 开始一次提问，返回该次提问的取消令牌
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        self.active.store(true, Ordering::SeqCst);
        token
    }

    pub fn end_turn(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_turn_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 当前提问的令牌（未开始提问时为一个未使用的子令牌）
    pub fn cancel_token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 取消当前提问
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    /// 关闭会话：取消根令牌（连带当前提问）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.root.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(()) = tokio::signal::ctrl_c().await {
                if supervisor.is_turn_active() {
                    tracing::info!("Received Ctrl+C, cancelling current turn...");
                    supervisor.cancel();
                } else {
                    tracing::info!("Received Ctrl+C, shutting down...");
                    supervisor.shutdown();
                    break;
                }
            }
        });

        #[cfg(unix)]
        {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, shutting down...");
                    supervisor.shutdown();
                }
            });
        }
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
