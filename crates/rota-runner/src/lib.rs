//! rota-runner: process-backed subagent execution.
//!
//! The shippable [`SubagentRunner`]: each spawned subject is a subprocess
//! running the task prompt through `sh -c`, with the subagent's name and
//! instructions exported in its environment. Children are tracked in an
//! owned registry; liveness resolves from exit state, and completion
//! handlers fire from a per-child waiter task. Smarter runners (an LLM
//! session, a remote worker) live behind the same trait.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use rota_types::{CompletionHandler, ExecutionResult, SubagentRunner, SubagentStatus};

struct SubjectEntry {
    name: String,
    status: SubagentStatus,
    /// Final result, kept until a completion handler consumes it.
    result: Option<ExecutionResult>,
    handler: Option<CompletionHandler>,
}

/// Registry-backed runner executing subjects as subprocesses.
pub struct ProcessRunner {
    entries: Arc<RwLock<HashMap<String, SubjectEntry>>>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subjects currently tracked (for status surfaces).
    pub async fn subject_count(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn finish_subject(
        entries: &Arc<RwLock<HashMap<String, SubjectEntry>>>,
        subject_id: &str,
        status: SubagentStatus,
        result: ExecutionResult,
    ) {
        let handler = {
            let mut entries = entries.write().await;
            let Some(entry) = entries.get_mut(subject_id) else {
                return;
            };
            entry.status = status;
            info!(
                subject = %subject_id,
                name = %entry.name,
                status = status.as_str(),
                "Subagent finished"
            );
            match entry.handler.take() {
                Some(handler) => Some(handler),
                None => {
                    entry.result = Some(result.clone());
                    None
                }
            }
        };
        if let Some(handler) = handler {
            handler(result).await;
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubagentRunner for ProcessRunner {
    async fn spawn(&self, name: &str, instructions: &str, task: &str) -> anyhow::Result<String> {
        let subject_id = uuid::Uuid::new_v4().to_string();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(task)
            .env("ROTA_SUBAGENT_NAME", name)
            .env("ROTA_SUBAGENT_INSTRUCTIONS", instructions)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn subagent process: {e}"))?;

        info!(subject = %subject_id, name = %name, "Spawned subagent process");
        self.entries.write().await.insert(
            subject_id.clone(),
            SubjectEntry {
                name: name.to_string(),
                status: SubagentStatus::Running,
                result: None,
                handler: None,
            },
        );

        let entries = self.entries.clone();
        let id = subject_id.clone();
        tokio::spawn(async move {
            let (status, result) = match child.wait_with_output().await {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if output.status.success() {
                        (SubagentStatus::Completed, ExecutionResult::success(stdout))
                    } else {
                        let code = output.status.code().unwrap_or(-1);
                        (
                            SubagentStatus::Failed,
                            ExecutionResult::failure(format!(
                                "Error (code {code}): {stderr}\n{stdout}"
                            )),
                        )
                    }
                }
                Err(e) => (
                    SubagentStatus::Failed,
                    ExecutionResult::failure(format!("wait failed: {e}")),
                ),
            };
            ProcessRunner::finish_subject(&entries, &id, status, result).await;
        });

        Ok(subject_id)
    }

    async fn poll(&self, subject_id: &str) -> anyhow::Result<SubagentStatus> {
        self.entries
            .read()
            .await
            .get(subject_id)
            .map(|e| e.status)
            .ok_or_else(|| anyhow::anyhow!("unknown subject: {subject_id}"))
    }

    async fn on_complete(&self, subject_id: &str, handler: CompletionHandler) {
        // The child may already have finished; if so, deliver immediately.
        let ready = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(subject_id) {
                Some(entry) if entry.status.is_terminal() => entry.result.take(),
                Some(entry) => {
                    entry.handler = Some(handler);
                    return;
                }
                None => {
                    warn!(subject = %subject_id, "Completion handler for unknown subject dropped");
                    return;
                }
            }
        };
        if let Some(result) = ready {
            handler(result).await;
        }
    }
}
