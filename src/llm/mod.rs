//! LLM execution interface - a single opaque invoke call.
//!
//! The production client pipes the prompt to an external CLI on stdin and
//! captures stdout. Any non-success (non-zero exit, spawn failure, timeout)
//! is a retriable failure for the caller; the timeout is always honored by
//! killing the child.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub success: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsage {
    pub elapsed_ms: u64,
}

impl LlmResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            usage: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke the model with `prompt`, bounded by `timeout`.
    /// Never returns Err: all failure modes land in `LlmResponse`.
    async fn invoke(&self, prompt: &str, timeout: Duration) -> LlmResponse;
}

/// Production client: `{command}` reads the prompt from stdin and writes the
/// result to stdout (the contract of the `claude` CLI in non-interactive
/// mode).
pub struct CliLlm {
    command: String,
}

impl CliLlm {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl LlmClient for CliLlm {
    async fn invoke(&self, prompt: &str, timeout: Duration) -> LlmResponse {
        let started = std::time::Instant::now();
        info!(command = %self.command, prompt_len = prompt.len(), "invoking LLM CLI");

        let mut child = match Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return LlmResponse::failure(format!("spawn {}: {e}", self.command)),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                return LlmResponse::failure(format!("write prompt: {e}"));
            }
            // Close stdin so the CLI sees EOF and starts the turn.
            drop(stdin);
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return LlmResponse::failure(format!("wait: {e}")),
            Err(_) => {
                warn!(timeout_s = timeout.as_secs(), "LLM call timed out - killing child");
                return LlmResponse::failure(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                ));
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if output.status.success() {
            LlmResponse {
                success: true,
                content: String::from_utf8_lossy(&output.stdout).to_string(),
                usage: Some(LlmUsage { elapsed_ms }),
                error: None,
            }
        } else {
            LlmResponse {
                success: false,
                content: String::from_utf8_lossy(&output.stdout).to_string(),
                usage: Some(LlmUsage { elapsed_ms }),
                error: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            }
        }
    }
}

/// Deterministic client for tests: replays queued responses in order, then
/// reports exhaustion as failure.
pub struct ScriptedLlm {
    responses: std::sync::Mutex<std::collections::VecDeque<LlmResponse>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }

    pub fn always_ok(content: &str) -> Self {
        Self::new(vec![LlmResponse {
            success: true,
            content: content.to_string(),
            usage: None,
            error: None,
        }])
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, _prompt: &str, _timeout: Duration) -> LlmResponse {
        self.responses
            .lock()
            .expect("scripted llm lock")
            .pop_front()
            .unwrap_or_else(|| LlmResponse::failure("scripted responses exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cli_llm_echoes_stdin() {
        // `cat` fulfils the stdin→stdout contract.
        let llm = CliLlm::new("cat");
        let resp = llm.invoke("hello model", Duration::from_secs(5)).await;
        assert!(resp.success, "error: {:?}", resp.error);
        assert_eq!(resp.content, "hello model");
    }

    #[tokio::test]
    async fn cli_llm_reports_missing_binary() {
        let llm = CliLlm::new("definitely-not-a-real-binary-5309");
        let resp = llm.invoke("x", Duration::from_secs(1)).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("spawn"));
    }

    #[tokio::test]
    async fn cli_llm_honors_timeout() {
        // `sh` reads the command from stdin, so this blocks for 10s unless
        // the timeout kills it.
        let llm = CliLlm::new("sh");
        let resp = llm.invoke("sleep 10", Duration::from_millis(200)).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn scripted_llm_replays_then_fails() {
        let llm = ScriptedLlm::new(vec![LlmResponse {
            success: true,
            content: "one".into(),
            usage: None,
            error: None,
        }]);
        assert!(llm.invoke("a", Duration::from_secs(1)).await.success);
        assert!(!llm.invoke("b", Duration::from_secs(1)).await.success);
    }
}
