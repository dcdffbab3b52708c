//! `Executor` implementations.
//!
//! Executor internals are an external collaborator's concern; these two
//! implementations cover the closed `ExecutorKind` set by shelling out over
//! whatever `NodeDriver` the handler already opened for the target node.

use async_trait::async_trait;
use flowctl_core::ActionId;
use flowctl_flow::{ExecLogger, Executor, ExecutorFactory, ExecutorKind, MessageType, NodeDriver};
use std::collections::HashMap;
use std::sync::Arc;

fn exec_err(action_id: ActionId, node_name: &str, reason: impl std::fmt::Display) -> flowctl_flow::ExecutionError {
    flowctl_flow::ExecutionError::ExecutorFailed {
        action_id,
        node_name: node_name.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_outputs(stdout: &str) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            outputs.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    outputs
}

/// Runs `with.command` as a shell command on the open driver.
///
/// Stdout lines of the form `key=value` populate the action's outputs;
/// everything else is forwarded to the log stream as-is.
pub struct ScriptExecutor {
    driver: Arc<dyn NodeDriver>,
}

impl ScriptExecutor {
    #[must_use]
    pub fn new(driver: Arc<dyn NodeDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    async fn execute(
        &self,
        with: serde_json::Value,
        inputs: &HashMap<String, String>,
        logger: &ExecLogger,
        action_id: ActionId,
        node_name: &str,
    ) -> Result<HashMap<String, String>, flowctl_flow::ExecutionError> {
        let command = with
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| exec_err(action_id.clone(), node_name, "'with.command' is required"))?;

        let env_prefix: String = inputs
            .iter()
            .map(|(k, v)| format!("export {k}={v:?}; "))
            .collect();
        let full_command = format!("{env_prefix}{command}");

        let output = self.driver.exec(&full_command, None).await?;

        if !output.stderr.is_empty() {
            logger.checkpoint(action_id.clone(), node_name.to_string(), output.stderr.clone(), MessageType::Log);
        }
        logger.checkpoint(action_id.clone(), node_name.to_string(), output.stdout.clone(), MessageType::Log);

        if output.exit_code != 0 {
            return Err(exec_err(
                action_id,
                node_name,
                format!("command exited with status {}", output.exit_code),
            ));
        }

        Ok(parse_outputs(&output.stdout))
    }
}

/// Runs `with.image`/`with.command` inside a container on the open driver,
/// via the `docker run` CLI already present on the target host.
pub struct DockerExecutor {
    driver: Arc<dyn NodeDriver>,
}

impl DockerExecutor {
    #[must_use]
    pub fn new(driver: Arc<dyn NodeDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn execute(
        &self,
        with: serde_json::Value,
        inputs: &HashMap<String, String>,
        logger: &ExecLogger,
        action_id: ActionId,
        node_name: &str,
    ) -> Result<HashMap<String, String>, flowctl_flow::ExecutionError> {
        let image = with
            .get("image")
            .and_then(|v| v.as_str())
            .ok_or_else(|| exec_err(action_id.clone(), node_name, "'with.image' is required"))?;
        let command = with.get("command").and_then(|v| v.as_str()).unwrap_or("");

        let env_args: String = inputs
            .iter()
            .map(|(k, v)| format!("-e {k}={v:?} "))
            .collect();
        let full_command = format!("docker run --rm {env_args}{image} {command}");

        let output = self.driver.exec(&full_command, None).await?;

        if !output.stderr.is_empty() {
            logger.checkpoint(action_id.clone(), node_name.to_string(), output.stderr.clone(), MessageType::Log);
        }
        logger.checkpoint(action_id.clone(), node_name.to_string(), output.stdout.clone(), MessageType::Log);

        if output.exit_code != 0 {
            return Err(exec_err(
                action_id,
                node_name,
                format!("container exited with status {}", output.exit_code),
            ));
        }

        Ok(parse_outputs(&output.stdout))
    }
}

/// Dispatches to `ScriptExecutor`/`DockerExecutor` by the action's declared kind.
pub struct DefaultExecutorFactory;

#[async_trait]
impl ExecutorFactory for DefaultExecutorFactory {
    async fn executor_for(
        &self,
        kind: ExecutorKind,
        driver: Arc<dyn NodeDriver>,
    ) -> Result<Box<dyn Executor>, flowctl_flow::ExecutionError> {
        Ok(match kind {
            ExecutorKind::Script => Box::new(ScriptExecutor::new(driver)),
            ExecutorKind::Docker => Box::new(DockerExecutor::new(driver)),
        })
    }
}
