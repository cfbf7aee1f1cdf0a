//! MedReact CLI
//!
//! 带 QUERY 时回答一次后退出；否则从 stdin 逐行读取问题，在同一会话中多轮对话（空行或 EOF 退出）。
//! Ctrl+C 取消当前提问，空闲时退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use medreact::config::load_config;
use medreact::memory::LedgerPersistence;
use medreact::react::ReactEvent;
use medreact::{create_agent_components, Session};

#[derive(Parser, Debug)]
#[command(name = "medreact", version, about = "Medical imaging ReAct agent")]
struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 随问题附带的影像（本地路径或 URL），可重复
    #[arg(short, long = "image")]
    images: Vec<String>,

    /// 每次提问最多的动作轮数（0 表示不限制）
    #[arg(long)]
    max_iterations: Option<usize>,

    /// 使用 Mock 推理模型（离线演示）
    #[arg(long)]
    mock: bool,

    /// 会话记录 JSONL；文件已存在时从中恢复会话
    #[arg(short, long)]
    transcript: Option<PathBuf>,

    /// 打印推理过程事件
    #[arg(short, long)]
    verbose: bool,

    /// 问题；省略时进入多轮对话
    query: Option<String>,
}

fn print_event(ev: &ReactEvent) {
    match ev {
        ReactEvent::ThinkingContent { text } => eprintln!("  thought: {}", text),
        ReactEvent::ToolCall { request_id, tool, args } => {
            eprintln!("  -> [{}] {} {}", request_id, tool, args)
        }
        ReactEvent::Observation {
            request_id,
            tool,
            preview,
            is_error,
        } => {
            let mark = if *is_error { "!" } else { "<-" };
            eprintln!("  {} [{}] {}: {}", mark, request_id, tool, preview)
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medreact::observability::init();
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    if cli.mock {
        cfg.llm.provider = "mock".to_string();
    }
    if let Some(n) = cli.max_iterations {
        cfg.agent.max_iterations = n;
    }

    let components =
        Arc::new(create_agent_components(&cfg).context("Failed to build action catalog")?);

    let transcript = cli.transcript.clone().or_else(|| {
        cfg.app
            .transcript_dir
            .as_ref()
            .map(|d| d.join(format!("{}.jsonl", chrono::Local::now().format("%Y%m%d-%H%M%S"))))
    });
    let mut session = match &transcript {
        Some(path) if path.exists() => {
            let store = LedgerPersistence::new(path);
            let ledger = store
                .load()
                .with_context(|| format!("Failed to resume {}", path.display()))?;
            tracing::info!("Resumed {} entries from {}", ledger.len(), path.display());
            Session::resume(components, ledger).with_transcript(store)
        }
        Some(path) => Session::new(components).with_transcript(LedgerPersistence::new(path)),
        None => Session::new(components),
    };
    session.supervisor().install_signal_handlers();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ReactEvent>();
    let verbose = cli.verbose;
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            if verbose {
                print_event(&ev);
            }
        }
    });

    if let Some(query) = cli.query.as_deref() {
        let answer = session.ask_with_events(query, cli.images.clone(), &tx).await?;
        println!("{}", answer);
        return Ok(());
    }

    // 多轮对话：影像只随第一个问题发送
    let mut images = cli.images.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let line = tokio::select! {
            l = lines.next_line() => l.context("Failed to read stdin")?,
            _ = session.supervisor().wait_for_shutdown() => None,
        };
        let Some(line) = line else { break };
        let query = line.trim();
        if query.is_empty() {
            break;
        }
        match session
            .ask_with_events(query, std::mem::take(&mut images), &tx)
            .await
        {
            Ok(answer) => println!("{}", answer),
            Err(medreact::core::AgentError::Cancelled) => {
                if session.supervisor().is_shutdown() {
                    break;
                }
                eprintln!("(cancelled)");
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}
