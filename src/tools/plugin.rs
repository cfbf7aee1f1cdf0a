//! 插件工具：由配置 [[tools.plugins]] 注册，运行「程序 + 参数模板」的本地能力提供方
//!
//! 参数模板中 {{key}} 从动作参数中取 key；完整参数 JSON 写入子进程 stdin。
//! 执行时无 shell，直接 exec program + substituted args；stdout 为 JSON 时作为结构化结果。
//! 调用被取消（future 被丢弃）时子进程随之被杀掉。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::PluginEntry;
use crate::tools::{truncate_output, ActionOutput, InputSchema, Tool};

/// 从配置项构建的插件工具
pub struct PluginTool {
    name: String,
    description: String,
    program: String,
    args_template: Vec<String>,
    schema: InputSchema,
    working_dir: Option<PathBuf>,
    max_result_chars: usize,
}

impl PluginTool {
    pub fn new(entry: &PluginEntry, max_result_chars: usize) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            program: entry.program.clone(),
            args_template: entry.args.clone(),
            schema: InputSchema {
                params: entry.params.clone(),
            },
            working_dir: entry.working_dir.clone(),
            max_result_chars,
        }
    }

    /// 替换模板中的 {{key}}；args 为已校验的 JSON 对象。
    /// 未提供（可选参数省略）或为 null 的占位符替换为空串
    fn substitute(&self, args: &Value) -> Vec<String> {
        let empty = serde_json::Map::new();
        let obj = args.as_object().unwrap_or(&empty);
        self.args_template
            .iter()
            .map(|tpl| {
                let mut s = tpl.clone();
                for (k, v) in obj {
                    let placeholder = format!("{{{{{}}}}}", k);
                    let val: String = match v {
                        Value::String(x) => x.clone(),
                        Value::Null => String::new(),
                        _ => v.to_string(),
                    };
                    s = s.replace(&placeholder, &val);
                }
                placeholder_re().replace_all(&s, "").into_owned()
            })
            .collect()
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[^{}]*\}\}").expect("placeholder pattern is valid"))
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> InputSchema {
        self.schema.clone()
    }

    async fn invoke(&self, args: Value) -> Result<ActionOutput, String> {
        let args_vec = self.substitute(&args);
        tracing::info!(tool = %self.name, program = %self.program, "plugin tool invoke");
        let mut cmd = Command::new(&self.program);
        cmd.args(&args_vec)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("plugin spawn failed: {}", e))?;
        if let Some(mut stdin) = child.stdin.take() {
            let payload = args.to_string();
            // 子进程可能不读 stdin，写失败不算错误
            let _ = stdin.write_all(payload.as_bytes()).await;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("plugin wait failed: {}", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                truncate_output(stderr.trim(), 500)
            ));
        }
        let stdout = stdout.trim();
        match serde_json::from_str::<Value>(stdout) {
            Ok(v) if stdout.chars().count() <= self.max_result_chars => Ok(v.into()),
            _ => Ok(truncate_output(stdout, self.max_result_chars).into()),
        }
    }
}
