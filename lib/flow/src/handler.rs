//! The Flow Execution Handler: runs one flow from `starting_action_idx`
//! through completion, approval gate, or cancellation.

use crate::definition::{Action, ExecutorKind, Flow};
use crate::error::ExecutionError;
use crate::execution::{ExecutionLog, ExecutionLogStore, ExecutionStatus, TriggerType};
use crate::interpolation::{self, Environment};
use crate::log_stream::{ExecLogger, LogStreamManager, MessageType};
use crate::node::Node;
use async_trait::async_trait;
use flowctl_core::{ActionId, ExecId, NamespaceId, UserId};
use flowctl_queue::error::HandlerError;
use flowctl_queue::job::Job;
use flowctl_queue::registry::Handler;
use flowctl_queue::job::PayloadType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Queue-visible payload routed to this handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecutionPayload {
    pub flow: Flow,
    #[serde(default)]
    pub input: JsonValue,
    #[serde(default)]
    pub starting_action_idx: usize,
    pub namespace_id: NamespaceId,
    pub trigger_type: TriggerType,
    pub user_id: Option<UserId>,
    /// Coordinator-local artifact directory for this execution.
    pub flow_directory: String,
    #[serde(default)]
    pub resumed: bool,
}

/// Result of gating on an approval-required action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
    /// No decision yet; a request now exists (freshly created or pre-existing).
    Pending,
}

/// The seam this crate uses to gate actions on approval, implemented by the
/// approval coordinator crate's adapter in the composition root.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn gate(&self, exec_id: ExecId, action_id: &ActionId) -> Result<ApprovalDecision, ExecutionError>;
}

/// Resolves a node name to its connection details within a namespace.
/// The empty string is never passed here; callers special-case it as local.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn resolve(&self, namespace_id: NamespaceId, name: &str) -> Result<Node, ExecutionError>;
}

/// Output of a single `NodeDriver::exec` call.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A connection to one target: the local host, or a remote node over SSH/QUIC-SSH.
#[async_trait]
pub trait NodeDriver: Send + Sync {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecutionError>;
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), ExecutionError>;
    async fn list_files(&self, dir: &str) -> Result<Vec<String>, ExecutionError>;
    async fn exec(&self, cmd: &str, stdin: Option<&[u8]>) -> Result<ExecOutput, ExecutionError>;
    fn join(&self, parts: &[&str]) -> String;
    fn temp_dir(&self) -> String;
    fn is_remote(&self) -> bool;
    async fn close(&self) -> Result<(), ExecutionError>;
}

/// Opens drivers for a node (or `None` for local execution).
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self, node: Option<&Node>) -> Result<Box<dyn NodeDriver>, ExecutionError>;
}

/// Runs one action's executor kind (`script`/`docker`) against an already-open driver.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        with: JsonValue,
        inputs: &HashMap<String, String>,
        logger: &ExecLogger,
        action_id: ActionId,
        node_name: &str,
    ) -> Result<HashMap<String, String>, ExecutionError>;
}

/// Constructs an `Executor` for a given action/node pair over an open driver.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn executor_for(
        &self,
        kind: ExecutorKind,
        driver: Arc<dyn NodeDriver>,
    ) -> Result<Box<dyn Executor>, ExecutionError>;
}

/// Collaborators wired in by the composition root.
pub struct FlowExecutionHandler {
    pub execution_log_store: Arc<dyn ExecutionLogStore>,
    pub log_stream: Arc<LogStreamManager>,
    pub approval_gate: Arc<dyn ApprovalGate>,
    pub node_resolver: Arc<dyn NodeResolver>,
    pub driver_factory: Arc<dyn DriverFactory>,
    pub executor_factory: Arc<dyn ExecutorFactory>,
    /// Holds the running flow definition so `ApprovalGate` implementations
    /// can resolve an action's approver allow-list from just `(exec_id,
    /// action_id)`.
    pub flow_cache: Arc<crate::cache::FlowCache>,
    pub artifact_root: PathBuf,
    pub job_timeout: StdDuration,
}

fn normalize_key(raw: &str, node_name: &str) -> String {
    if node_name.is_empty() {
        raw.to_string()
    } else {
        format!("{raw}@{node_name}")
    }
}

impl FlowExecutionHandler {
    fn payload_type_tag() -> PayloadType {
        PayloadType::new("flow_execution")
    }

    fn artifact_dir(&self, exec_id: ExecId) -> PathBuf {
        self.artifact_root.join(exec_id.to_string())
    }

    /// Walks one level deep under `artifact_dir` and uploads every file to
    /// `<driver.temp_dir>/artifacts-<exec_id>/<subdir>/<filename>`.
    async fn push_artifacts(
        &self,
        driver: &dyn NodeDriver,
        exec_id: ExecId,
    ) -> Result<(), ExecutionError> {
        let local_dir = self.artifact_dir(exec_id);
        let remote_base = driver.join(&[&driver.temp_dir(), &format!("artifacts-{exec_id}")]);

        let mut top = match tokio::fs::read_dir(&local_dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(()),
        };
        while let Ok(Some(subdir)) = top.next_entry().await {
            if !subdir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let subdir_name = subdir.file_name().to_string_lossy().to_string();
            let mut files = match tokio::fs::read_dir(subdir.path()).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Ok(Some(file)) = files.next_entry().await {
                if !file.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                let filename = file.file_name().to_string_lossy().to_string();
                let remote_path = driver.join(&[&remote_base, &subdir_name, &filename]);
                driver.upload(&file.path(), &remote_path).await?;
            }
        }
        Ok(())
    }

    /// Pulls everything under `<driver.temp_dir>/artifacts-<exec_id>/` into
    /// `<artifact_dir>/<node_name or "local">/…`. Absence of the remote
    /// directory is not an error.
    async fn pull_artifacts(
        &self,
        driver: &dyn NodeDriver,
        exec_id: ExecId,
        node_name: &str,
    ) -> Result<(), ExecutionError> {
        let remote_base = driver.join(&[&driver.temp_dir(), &format!("artifacts-{exec_id}")]);
        let files = match driver.list_files(&remote_base).await {
            Ok(files) => files,
            Err(_) => return Ok(()),
        };
        let dest_subdir = if node_name.is_empty() { "local" } else { node_name };
        let local_dir = self.artifact_dir(exec_id).join(dest_subdir);
        tokio::fs::create_dir_all(&local_dir)
            .await
            .map_err(|e| ExecutionError::LogWriteFailed {
                reason: format!("creating artifact dir failed: {e}"),
            })?;

        for file in files {
            let remote_path = driver.join(&[&remote_base, &file]);
            let local_path = local_dir.join(&file);
            driver.download(&remote_path, &local_path).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, flow, env), fields(action_id = %action.id))]
    async fn run_action_on_node(
        &self,
        flow: &Flow,
        action: &Action,
        node_name: &str,
        env: &Environment,
        exec_id: ExecId,
        logger: &ExecLogger,
    ) -> Result<HashMap<String, JsonValue>, ExecutionError> {
        let node = if Node::is_local_name(node_name) {
            None
        } else {
            Some(self.node_resolver.resolve(flow.namespace_id, node_name).await?)
        };

        let driver = self.driver_factory.open(node.as_ref()).await?;
        let driver: Arc<dyn NodeDriver> = Arc::from(driver);

        self.push_artifacts(driver.as_ref(), exec_id).await?;

        let mut inputs = HashMap::new();
        for var in &action.variables {
            let rendered = interpolation::evaluate(&var.template, env).map_err(|e| {
                ExecutionError::ExecutorFailed {
                    action_id: action.id.clone(),
                    node_name: node_name.to_string(),
                    reason: e.to_string(),
                }
            })?;
            inputs.insert(var.name.clone(), rendered);
        }

        let executor = self
            .executor_factory
            .executor_for(action.executor, driver.clone())
            .await?;

        let result = executor
            .execute(action.with.clone(), &inputs, logger, action.id.clone(), node_name)
            .await;

        self.pull_artifacts(driver.as_ref(), exec_id, node_name).await?;
        driver.close().await?;

        let result = result?;
        Ok(result
            .into_iter()
            .map(|(k, v)| (normalize_key(&k, node_name), JsonValue::String(v)))
            .collect())
    }

    /// Runs actions `[starting_action_idx, flow.actions.len())` of `payload.flow`.
    async fn run(
        &self,
        payload: &FlowExecutionPayload,
        exec_id: ExecId,
        cancellation: CancellationToken,
    ) -> Result<(), ExecutionError> {
        let mut log = self.execution_log_store.get(exec_id).await?;
        if log.status == ExecutionStatus::Pending {
            log.transition(ExecutionStatus::Running)?;
            let version = log.version - 1;
            self.execution_log_store.update(log.clone(), version).await?;
        }

        let logger = self.log_stream.new_logger(exec_id);
        let inputs: HashMap<String, JsonValue> =
            serde_json::from_value(payload.input.clone()).unwrap_or_default();
        let mut env = Environment {
            inputs,
            secrets: HashMap::new(),
            outputs: log
                .outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        for idx in payload.starting_action_idx..payload.flow.actions.len() {
            let action = &payload.flow.actions[idx];

            if cancellation.is_cancelled() {
                logger.checkpoint(action.id.clone(), "", "cancelled", MessageType::Cancelled);
                let version = log.version;
                log.transition(ExecutionStatus::Cancelled)?;
                self.execution_log_store.update(log, version).await?;
                self.log_stream.close(exec_id);
                return Err(ExecutionError::Cancelled);
            }

            log.current_action_id = Some(action.id.clone());
            let version = log.version;
            self.execution_log_store.update(log.clone(), version).await?;

            if action.approval {
                match self.approval_gate.gate(exec_id, &action.id).await? {
                    ApprovalDecision::Approved => {}
                    ApprovalDecision::Rejected { reason } => {
                        let version = log.version;
                        log.error = Some(reason.clone());
                        log.transition(ExecutionStatus::Errored)?;
                        self.execution_log_store.update(log, version).await?;
                        return Err(ExecutionError::ApprovalRejected {
                            action_id: action.id.clone(),
                            reason,
                        });
                    }
                    ApprovalDecision::Pending => {
                        let version = log.version;
                        log.transition(ExecutionStatus::PendingApproval)?;
                        self.execution_log_store.update(log, version).await?;
                        return Err(ExecutionError::PendingApproval);
                    }
                }
            }

            // Races the node fan-out for this action against an external cancel,
            // so a long-running action is interrupted rather than run to completion.
            let merged: HashMap<String, JsonValue> = tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    logger.checkpoint(action.id.clone(), "", "cancelled", MessageType::Cancelled);
                    let version = log.version;
                    log.transition(ExecutionStatus::Cancelled)?;
                    self.execution_log_store.update(log, version).await?;
                    self.log_stream.close(exec_id);
                    return Err(ExecutionError::Cancelled);
                }
                result = async {
                    let mut merged = HashMap::new();
                    for target in action.targets() {
                        let result = self
                            .run_action_on_node(&payload.flow, action, &target, &env, exec_id, &logger)
                            .await?;
                        merged.extend(result);
                    }
                    Ok::<_, ExecutionError>(merged)
                } => result?,
            };

            for (key, value) in &merged {
                if let Some((base, node)) = key.rsplit_once('@') {
                    env.outputs
                        .entry(node.to_string())
                        .or_insert_with(|| JsonValue::Object(Default::default()));
                    if let Some(JsonValue::Object(map)) = env.outputs.get_mut(node) {
                        map.insert(base.to_string(), value.clone());
                    }
                } else {
                    env.outputs.insert(key.clone(), value.clone());
                }
            }
            log.outputs = env.outputs.clone();
            let version = log.version;
            self.execution_log_store.update(log.clone(), version).await?;

            let payload_str = serde_json::to_string(&merged).unwrap_or_default();
            logger.checkpoint(action.id.clone(), "", payload_str, MessageType::Result);
        }

        let version = log.version;
        log.current_action_id = None;
        log.transition(ExecutionStatus::Completed)?;
        self.execution_log_store.update(log, version).await?;

        if let Err(e) = tokio::fs::remove_dir_all(self.artifact_dir(exec_id)).await {
            warn!(%exec_id, error = %e, "failed to remove artifact directory");
        }
        self.log_stream.close(exec_id);
        Ok(())
    }
}

#[async_trait]
impl Handler for FlowExecutionHandler {
    fn payload_type(&self) -> PayloadType {
        Self::payload_type_tag()
    }

    #[instrument(skip(self, job, cancellation), fields(exec_id = %job.exec_id))]
    async fn handle(&self, job: &Job, cancellation: CancellationToken) -> Result<(), HandlerError> {
        let payload: FlowExecutionPayload =
            serde_json::from_slice(&job.payload).map_err(|e| HandlerError::Failed {
                reason: format!("malformed flow execution payload: {e}"),
            })?;

        info!(exec_id = %job.exec_id, flow = %payload.flow.slug, "running flow execution");

        self.flow_cache.register(job.exec_id, payload.flow.clone());

        let result = tokio::time::timeout(
            self.job_timeout,
            self.run(&payload, job.exec_id, cancellation.clone()),
        )
        .await;

        self.flow_cache.remove(job.exec_id);

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ExecutionError::PendingApproval)) => Err(HandlerError::PendingApproval),
            Ok(Err(ExecutionError::Cancelled)) => Err(HandlerError::ExecutionCancelled),
            Ok(Err(e)) => Err(HandlerError::Failed {
                reason: e.to_string(),
            }),
            Err(_) => {
                cancellation.cancel();
                Err(HandlerError::ExecutionCancelled)
            }
        }
    }
}
