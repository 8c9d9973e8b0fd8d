//! Tracker command execution abstraction.
//!
//! `args[0]` is the program (`gh` or `git`); everything runs with the
//! repository root as the working directory.

use async_trait::async_trait;
use cabinet_core::{CabinetError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Per-call wall clock for tracker commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Output from a tracker command
#[derive(Debug, Clone)]
pub struct GhOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl GhOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn err(stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
        }
    }
}

impl From<Output> for GhOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// Trait for executing tracker commands (allows scripting in tests)
#[async_trait]
pub trait GhExecutor: Send + Sync {
    /// Execute a command; `args[0]` is the program name.
    async fn exec(&self, args: &[&str]) -> Result<GhOutput>;

    /// Get the repository root
    fn repo_root(&self) -> &PathBuf;
}

#[async_trait]
impl<T: GhExecutor + ?Sized> GhExecutor for std::sync::Arc<T> {
    async fn exec(&self, args: &[&str]) -> Result<GhOutput> {
        (**self).exec(args).await
    }

    fn repo_root(&self) -> &PathBuf {
        (**self).repo_root()
    }
}

/// Real command executor running `gh`/`git` in the repository root
#[derive(Clone)]
pub struct GhCli {
    repo_root: PathBuf,
}

impl GhCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

#[async_trait]
impl GhExecutor for GhCli {
    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    async fn exec(&self, args: &[&str]) -> Result<GhOutput> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| CabinetError::TrackerFatal("empty command".to_string()))?;
        debug!("Executing {} {:?}", program, rest);

        let fut = Command::new(program)
            .args(rest)
            .current_dir(&self.repo_root)
            .output();

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, fut).await {
            Ok(result) => result.map_err(|e| {
                CabinetError::TrackerFatal(format!("failed to execute {}: {}", program, e))
            })?,
            Err(_) => {
                return Ok(GhOutput {
                    stdout: String::new(),
                    stderr: format!("timeout after {}s", COMMAND_TIMEOUT.as_secs()),
                    success: false,
                });
            }
        };

        let gh_output = GhOutput::from(output);
        if !gh_output.success {
            debug!("Command failed: {}", gh_output.stderr);
        }
        Ok(gh_output)
    }

    fn repo_root(&self) -> &PathBuf {
        &self.repo_root
    }
}

/// Scripted executor for testing.
///
/// Responses are keyed by the joined argv. Exact matches win; prefix matches
/// cover commands with long generated bodies. Every call is recorded.
pub struct MockGhExecutor {
    repo_root: PathBuf,
    responses: Mutex<HashMap<String, Vec<GhOutput>>>,
    prefix_responses: Mutex<Vec<(String, GhOutput)>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockGhExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGhExecutor {
    pub fn new() -> Self {
        Self {
            repo_root: PathBuf::from("/mock/repo"),
            responses: Mutex::new(HashMap::new()),
            prefix_responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script a response for an exact argv. Multiple responses for the same
    /// argv are returned in order; the last one repeats.
    pub fn with_response(self, command: &str, output: GhOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push(output);
        self
    }

    /// Script a response for any argv starting with `prefix`.
    pub fn with_prefix_response(self, prefix: &str, output: GhOutput) -> Self {
        self.prefix_responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), output));
        self
    }

    /// All argv strings seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any recorded call starts with `prefix`.
    pub fn saw_call(&self, prefix: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl GhExecutor for MockGhExecutor {
    async fn exec(&self, args: &[&str]) -> Result<GhOutput> {
        let key = args.join(" ");
        self.calls.lock().unwrap().push(key.clone());

        if let Some(queue) = self.responses.lock().unwrap().get_mut(&key) {
            if queue.len() > 1 {
                return Ok(queue.remove(0));
            }
            if let Some(last) = queue.first() {
                return Ok(last.clone());
            }
        }
        for (prefix, output) in self.prefix_responses.lock().unwrap().iter() {
            if key.starts_with(prefix.as_str()) {
                return Ok(output.clone());
            }
        }
        Err(CabinetError::TrackerFatal(format!(
            "no mock response for: {}",
            key
        )))
    }

    fn repo_root(&self) -> &PathBuf {
        &self.repo_root
    }
}
