//! The local driver: trivial passthroughs over the coordinator's own filesystem.

use crate::error::DriverError;
use async_trait::async_trait;
use flowctl_flow::{ExecOutput, NodeDriver};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

fn io_err(reason: impl std::fmt::Display) -> flowctl_flow::ExecutionError {
    let driver_err = DriverError::TransferFailed {
        path: String::new(),
        reason: reason.to_string(),
    };
    flowctl_flow::ExecutionError::NodeUnreachable {
        node_name: String::new(),
        reason: driver_err.to_string(),
    }
}

/// Runs actions with no `on` target against the coordinator host itself.
pub struct LocalDriver {
    temp_dir: PathBuf,
}

impl LocalDriver {
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

#[async_trait]
impl NodeDriver for LocalDriver {
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), flowctl_flow::ExecutionError> {
        if let Some(parent) = Path::new(remote_path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::copy(local_path, remote_path).await.map_err(io_err)?;
        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), flowctl_flow::ExecutionError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::copy(remote_path, local_path).await.map_err(io_err)?;
        Ok(())
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>, flowctl_flow::ExecutionError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }

    async fn exec(
        &self,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, flowctl_flow::ExecutionError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::ExecFailed {
                reason: e.to_string(),
            })
            .map_err(|e| flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: String::new(),
                reason: e.to_string(),
            })?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                let _ = pipe.write_all(input).await;
            }
        } else {
            drop(child.stdin.take());
        }

        let output = child.wait_with_output().await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: String::new(),
                reason: format!("local exec failed: {e}"),
            }
        })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut path = PathBuf::new();
        for part in parts {
            path.push(part);
        }
        path.to_string_lossy().into_owned()
    }

    fn temp_dir(&self) -> String {
        self.temp_dir.to_string_lossy().into_owned()
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), flowctl_flow::ExecutionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_builds_a_path_from_parts() {
        let driver = LocalDriver::new("/tmp");
        assert_eq!(driver.join(&["/tmp", "artifacts-abc", "file.txt"]), "/tmp/artifacts-abc/file.txt");
    }

    #[tokio::test]
    async fn exec_runs_a_shell_command_and_captures_output() {
        let driver = LocalDriver::default();
        let out = driver.exec("echo hello", None).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path());
        let src = tmp.path().join("src.txt");
        tokio::fs::write(&src, b"payload").await.unwrap();

        let remote = tmp.path().join("remote/src.txt");
        driver.upload(&src, remote.to_str().unwrap()).await.unwrap();

        let dest = tmp.path().join("dest.txt");
        driver.download(remote.to_str().unwrap(), &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn list_files_of_missing_dir_is_empty_not_an_error() {
        let driver = LocalDriver::default();
        assert!(driver.list_files("/no/such/dir").await.unwrap().is_empty());
    }

    #[test]
    fn is_remote_is_false() {
        assert!(!LocalDriver::default().is_remote());
    }
}
