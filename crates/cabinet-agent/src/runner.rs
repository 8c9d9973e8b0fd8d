//! Agent invocation: spawn, stream, collect, enforce deadline.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cabinet_core::{CabinetError, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Environment variable that marks a nested agent session. It must be cleared
/// before spawning so agents can be launched from inside another agent.
const NESTED_SESSION_SENTINEL: &str = "CLAUDECODE";

/// Reasoning effort hint passed through to the agent binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effort {
    Low,
    Medium,
    High,
    Max,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Opaque model id, passed through unchanged
    pub model: String,
    /// Allowed tool names; empty means the agent gets no tools
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub timeout: Duration,
    pub effort: Option<Effort>,
    /// Environment overrides applied to the child. The defaults clear the
    /// nested-session sentinel so agents can be launched from inside another
    /// agent, and the provider key so the child falls back to its own auth.
    pub env_overrides: Vec<(String, String)>,
}

impl AgentRequest {
    pub fn new(system_prompt: &str, user_prompt: &str, model: &str) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            model: model.to_string(),
            allowed_tools: Vec::new(),
            max_turns: 1,
            timeout: Duration::from_secs(900),
            effort: None,
            env_overrides: vec![
                (NESTED_SESSION_SENTINEL.to_string(), String::new()),
                ("ANTHROPIC_API_KEY".to_string(), String::new()),
            ],
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.allowed_tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_effort(mut self, effort: Effort) -> Self {
        self.effort = Some(effort);
        self
    }
}

/// Result of a successful agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Final assistant text (may be empty only inside error paths)
    pub text: String,
    pub duration: Duration,
}

/// Abstraction over agent execution backends; tests use scripted runners.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: &AgentRequest) -> Result<AgentOutcome>;
}

/// Runner that spawns the configured agent CLI binary.
#[derive(Clone)]
pub struct SubprocessRunner {
    bin: String,
    workdir: PathBuf,
}

impl SubprocessRunner {
    pub fn new(bin: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl AgentRunner for SubprocessRunner {
    #[instrument(skip_all, fields(model = %request.model, max_turns = request.max_turns))]
    async fn run(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        let started = Instant::now();
        let max_turns = request.max_turns.to_string();

        let mut cmd = Command::new(&self.bin);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--model")
            .arg(&request.model)
            .arg("--max-turns")
            .arg(&max_turns)
            .arg("--system-prompt")
            .arg(&request.system_prompt);
        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowed-tools")
                .arg(request.allowed_tools.join(","));
        }
        if let Some(effort) = request.effort {
            cmd.arg("--effort").arg(effort.as_str());
        }
        cmd.current_dir(&self.workdir);
        for (key, value) in &request.env_overrides {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning agent subprocess");
        let mut child = cmd
            .spawn()
            .map_err(|e| CabinetError::AgentExec(format!("spawn {}: {}", self.bin, e)))?;

        let mut stdin = child.stdin.take().expect("stdin piped");
        let stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");
        let prompt = request.user_prompt.clone();

        // Feed the prompt and close stdin so the agent sees EOF.
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        // Collect assistant text from the JSONL message stream. Partial text
        // is shared so a timeout can still report what was produced.
        let partial = std::sync::Arc::new(Mutex::new(Vec::<String>::new()));
        let collector_partial = partial.clone();
        let collector = async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut result_text = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                match message.get("type").and_then(Value::as_str) {
                    Some("assistant") => {
                        if let Some(blocks) = message["message"]["content"].as_array() {
                            for block in blocks {
                                if block["type"] == "text" {
                                    if let Some(text) = block["text"].as_str() {
                                        collector_partial
                                            .lock()
                                            .unwrap()
                                            .push(text.to_string());
                                    }
                                }
                            }
                        }
                    }
                    Some("result") => {
                        if let Some(text) = message.get("result").and_then(Value::as_str) {
                            result_text = text.to_string();
                        }
                    }
                    _ => {}
                }
            }
            let parts = collector_partial.lock().unwrap();
            if parts.is_empty() && !result_text.is_empty() {
                result_text
            } else {
                parts.join("\n")
            }
        };

        let text = match tokio::time::timeout(request.timeout, collector).await {
            Ok(text) => text,
            Err(_) => {
                warn!("Agent timed out after {:?}; killing", request.timeout);
                let _ = child.start_kill();
                let _ = child.wait().await;
                writer.abort();
                stderr_reader.abort();
                return Err(CabinetError::AgentTimeout {
                    seconds: request.timeout.as_secs(),
                    partial: partial.lock().unwrap().join("\n"),
                });
            }
        };

        let _ = writer.await;
        let status = child
            .wait()
            .await
            .map_err(|e| CabinetError::AgentExec(format!("wait: {}", e)))?;
        let stderr_text = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            let tail: String = stderr_text.chars().rev().take(500).collect::<String>()
                .chars().rev().collect();
            return Err(CabinetError::AgentExec(format!(
                "exit {:?}: {}",
                status.code(),
                tail.trim()
            )));
        }
        if text.trim().is_empty() {
            return Err(CabinetError::AgentEmpty);
        }

        let duration = started.elapsed();
        info!("Agent finished in {:?} ({} chars)", duration, text.len());
        Ok(AgentOutcome { text, duration })
    }
}

/// Scripted response kind for [`MockAgentRunner`].
#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Timeout,
    Exec(String),
    Empty,
}

/// Scripted runner for tests.
///
/// Responses are matched against the user prompt (substring). Pattern rules
/// are checked in registration order; per-pattern responses are consumed as a
/// queue with the last one repeating. Unmatched prompts fall back to
/// `default_text`, or fail when none is set.
pub struct MockAgentRunner {
    rules: Mutex<Vec<(String, VecDeque<Scripted>)>>,
    default_text: Mutex<Option<String>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl Default for MockAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentRunner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_text: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, pattern: &str, text: &str) -> Self {
        self.push(pattern, Scripted::Text(text.to_string()));
        self
    }

    pub fn fail_timeout(self, pattern: &str) -> Self {
        self.push(pattern, Scripted::Timeout);
        self
    }

    pub fn fail_exec(self, pattern: &str, message: &str) -> Self {
        self.push(pattern, Scripted::Exec(message.to_string()));
        self
    }

    pub fn fail_empty(self, pattern: &str) -> Self {
        self.push(pattern, Scripted::Empty);
        self
    }

    pub fn with_default(self, text: &str) -> Self {
        *self.default_text.lock().unwrap() = Some(text.to_string());
        self
    }

    fn push(&self, pattern: &str, response: Scripted) {
        let mut rules = self.rules.lock().unwrap();
        if let Some((_, queue)) = rules.iter_mut().find(|(p, _)| p == pattern) {
            queue.push_back(response);
        } else {
            rules.push((pattern.to_string(), VecDeque::from([response])));
        }
    }

    /// Every request seen, in call order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRunner for MockAgentRunner {
    async fn run(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|(pattern, _)| {
                    request.user_prompt.contains(pattern.as_str())
                        || request.system_prompt.contains(pattern.as_str())
                })
                .map(|(_, queue)| {
                    if queue.len() > 1 {
                        queue.pop_front().unwrap()
                    } else {
                        queue.front().unwrap().clone()
                    }
                })
        };

        let scripted = match scripted {
            Some(s) => s,
            None => match self.default_text.lock().unwrap().clone() {
                Some(text) => Scripted::Text(text),
                None => {
                    return Err(CabinetError::AgentExec(format!(
                        "no scripted response for prompt: {}",
                        &request.user_prompt.chars().take(80).collect::<String>()
                    )))
                }
            },
        };

        match scripted {
            Scripted::Text(text) => Ok(AgentOutcome {
                text,
                duration: Duration::from_millis(1),
            }),
            Scripted::Timeout => Err(CabinetError::AgentTimeout {
                seconds: request.timeout.as_secs(),
                partial: String::new(),
            }),
            Scripted::Exec(message) => Err(CabinetError::AgentExec(message)),
            Scripted::Empty => Err(CabinetError::AgentEmpty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_matches_by_pattern() {
        let runner = MockAgentRunner::new()
            .respond("Ministry of Finance", "{\"score\": 8}")
            .respond("Ministry of Health", "{\"score\": 4}");

        let finance = AgentRequest::new("sys", "Analyze as the Ministry of Finance", "m");
        let health = AgentRequest::new("sys", "Analyze as the Ministry of Health", "m");
        assert_eq!(runner.run(&finance).await.unwrap().text, "{\"score\": 8}");
        assert_eq!(runner.run(&health).await.unwrap().text, "{\"score\": 4}");
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_queue_consumes_in_order() {
        let runner = MockAgentRunner::new()
            .respond("review", "VERDICT: CHANGES_REQUESTED")
            .respond("review", "VERDICT: APPROVED");

        let request = AgentRequest::new("sys", "please review this", "m");
        assert!(runner.run(&request).await.unwrap().text.contains("CHANGES"));
        assert!(runner.run(&request).await.unwrap().text.contains("APPROVED"));
        // Last response repeats
        assert!(runner.run(&request).await.unwrap().text.contains("APPROVED"));
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let runner = MockAgentRunner::new()
            .fail_timeout("slow")
            .fail_empty("quiet");

        let slow = AgentRequest::new("s", "a slow task", "m");
        assert_eq!(runner.run(&slow).await.unwrap_err().kind(), "AgentTimeout");

        let quiet = AgentRequest::new("s", "a quiet task", "m");
        assert_eq!(runner.run(&quiet).await.unwrap_err().kind(), "AgentEmpty");
    }

    #[tokio::test]
    async fn test_mock_unscripted_fails_without_default() {
        let runner = MockAgentRunner::new();
        let request = AgentRequest::new("s", "anything", "m");
        assert!(runner.run(&request).await.is_err());

        let runner = MockAgentRunner::new().with_default("ok");
        assert_eq!(runner.run(&request).await.unwrap().text, "ok");
    }

    #[test]
    fn test_request_builder() {
        let request = AgentRequest::new("sys", "user", "model-x")
            .with_tools(&["Read", "Grep"])
            .with_max_turns(5)
            .with_effort(Effort::High);
        assert_eq!(request.allowed_tools, vec!["Read", "Grep"]);
        assert_eq!(request.max_turns, 5);
        assert_eq!(request.effort, Some(Effort::High));
    }

    #[test]
    fn test_default_env_clears_nested_session_sentinel() {
        let request = AgentRequest::new("s", "u", "m");
        assert!(request
            .env_overrides
            .iter()
            .any(|(key, value)| key == "CLAUDECODE" && value.is_empty()));
    }
}
