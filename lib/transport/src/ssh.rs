//! The SSH driver: password or key auth over TCP, SFTP for file transfer.

use crate::credential::CredentialData;
use crate::error::DriverError;
use async_trait::async_trait;
use flowctl_flow::{ExecOutput, NodeDriver};
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh_sftp::client::SftpSession;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

struct PermissiveHandler;

#[async_trait]
impl client::Handler for PermissiveHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key pinning lives at the node-registration layer, not here;
        // the coordinator trusts nodes it was explicitly configured with.
        Ok(true)
    }
}

fn conn_err(node_name: &str, reason: impl std::fmt::Display) -> flowctl_flow::ExecutionError {
    let driver_err = DriverError::ConnectionFailed {
        node_name: node_name.to_string(),
        reason: reason.to_string(),
    };
    flowctl_flow::ExecutionError::NodeUnreachable {
        node_name: node_name.to_string(),
        reason: driver_err.to_string(),
    }
}

/// A connection to one remote node over plain SSH.
pub struct SshDriver {
    node_name: String,
    hostname: String,
    port: u16,
    username: String,
    handle: Mutex<Handle<PermissiveHandler>>,
}

impl SshDriver {
    /// Establishes a session and authenticates with `credential`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::NodeUnreachable` if the TCP connection or
    /// authentication fails.
    pub async fn connect(
        node_name: &str,
        hostname: &str,
        port: u16,
        username: &str,
        credential: &CredentialData,
    ) -> Result<Self, flowctl_flow::ExecutionError> {
        let config = Arc::new(client::Config {
            ..Default::default()
        });

        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(config, (hostname, port), PermissiveHandler),
        )
        .await
        .map_err(|_| conn_err(node_name, "timed out after 5s"))?
        .map_err(|e| conn_err(node_name, e))?;

        let authenticated = match credential {
            CredentialData::Password { password } => handle
                .authenticate_password(username, password)
                .await
                .map_err(|e| conn_err(node_name, e))?,
            CredentialData::PrivateKey {
                private_key_pem,
                passphrase,
            } => {
                let key = russh::keys::decode_secret_key(private_key_pem, passphrase.as_deref())
                    .map_err(|e| conn_err(node_name, e))?;
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), None),
                    )
                    .await
                    .map_err(|e| conn_err(node_name, e))?
            }
        };

        if !authenticated.success() {
            return Err(conn_err(node_name, "credentials rejected"));
        }

        Ok(Self {
            node_name: node_name.to_string(),
            hostname: hostname.to_string(),
            port,
            username: username.to_string(),
            handle: Mutex::new(handle),
        })
    }

    async fn open_sftp(&self) -> Result<SftpSession, flowctl_flow::ExecutionError> {
        let handle = self.handle.lock().await;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| conn_err(&self.node_name, e))
    }
}

#[async_trait]
impl NodeDriver for SshDriver {
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), flowctl_flow::ExecutionError> {
        let contents = tokio::fs::read(local_path).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: format!("reading local artifact failed: {e}"),
            }
        })?;
        let sftp = self.open_sftp().await?;
        if let Some(parent) = Path::new(remote_path).parent().and_then(|p| p.to_str()) {
            let _ = sftp.create_dir(parent).await;
        }
        let mut file = sftp.create(remote_path).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: format!("opening remote file for write failed: {e}"),
            }
        })?;
        use tokio::io::AsyncWriteExt;
        file.write_all(&contents).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: format!("writing remote file failed: {e}"),
            }
        })
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), flowctl_flow::ExecutionError> {
        let sftp = self.open_sftp().await?;
        let mut remote = sftp.open(remote_path).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: format!("opening remote file for read failed: {e}"),
            }
        })?;
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        remote.read_to_end(&mut buf).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: format!("reading remote file failed: {e}"),
            }
        })?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(local_path, buf).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: format!("writing local file failed: {e}"),
            }
        })
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>, flowctl_flow::ExecutionError> {
        let sftp = self.open_sftp().await?;
        let entries = match sftp.read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(entries
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name())
            .collect())
    }

    async fn exec(
        &self,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, flowctl_flow::ExecutionError> {
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;
        channel
            .exec(true, cmd)
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;

        if let Some(input) = stdin {
            channel.data(input).await.map_err(|e| conn_err(&self.node_name, e))?;
        }
        channel.eof().await.ok();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = -1;

        use russh::ChannelMsg;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, .. } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn join(&self, parts: &[&str]) -> String {
        parts.join("/")
    }

    fn temp_dir(&self) -> String {
        "/tmp".to_string()
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), flowctl_flow::ExecutionError> {
        let handle = self.handle.lock().await;
        handle
            .disconnect(russh::Disconnect::ByApplication, "execution complete", "en")
            .await
            .map_err(|e| flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: self.node_name.clone(),
                reason: DriverError::CloseFailed {
                    reason: e.to_string(),
                }
                .to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uses_forward_slashes_for_remote_paths() {
        // SshDriver is constructed only via a live TCP connection, so this
        // exercises the pure path-joining logic through a standalone helper
        // mirroring the trait method body.
        let parts = ["/tmp", "artifacts-abc", "file.txt"];
        assert_eq!(parts.join("/"), "/tmp/artifacts-abc/file.txt");
    }
}
