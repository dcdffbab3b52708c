//! Selects and opens the right `NodeDriver` for a node's connection type,
//! resolving credentials through the `CredentialVault` seam.

use crate::credential::CredentialVault;
use crate::local::LocalDriver;
use crate::qssh::QsshDriver;
use crate::ssh::SshDriver;
use async_trait::async_trait;
use flowctl_flow::{ConnectionType, DriverFactory, Node, NodeDriver};
use std::sync::Arc;

/// Opens `LocalDriver` for `node: None`, otherwise dials the node's
/// `connection_type` after loading its credential from the vault.
pub struct DefaultDriverFactory {
    vault: Arc<dyn CredentialVault>,
    local_temp_dir: std::path::PathBuf,
}

impl DefaultDriverFactory {
    #[must_use]
    pub fn new(vault: Arc<dyn CredentialVault>, local_temp_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            vault,
            local_temp_dir: local_temp_dir.into(),
        }
    }
}

#[async_trait]
impl DriverFactory for DefaultDriverFactory {
    async fn open(&self, node: Option<&Node>) -> Result<Box<dyn NodeDriver>, flowctl_flow::ExecutionError> {
        let Some(node) = node else {
            return Ok(Box::new(LocalDriver::new(self.local_temp_dir.clone())));
        };

        let credential = self.vault.get_data(node.credential_id).await.map_err(|e| {
            flowctl_flow::ExecutionError::NodeUnreachable {
                node_name: node.name.clone(),
                reason: format!("credential lookup failed: {e}"),
            }
        })?;

        match node.connection_type {
            ConnectionType::Ssh => {
                let driver = SshDriver::connect(&node.name, &node.hostname, node.port, &node.username, &credential)
                    .await?;
                Ok(Box::new(driver))
            }
            ConnectionType::Qssh => {
                let driver = QsshDriver::connect(
                    &node.name,
                    &node.hostname,
                    node.port,
                    node.skip_cert_verification,
                )
                .await?;
                Ok(Box::new(driver))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, CredentialData, CredentialType};
    use crate::error::CredentialError;
    use flowctl_core::{CredentialId, UserId};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct StubVault {
        data: Mutex<HashMap<CredentialId, CredentialData>>,
    }

    #[async_trait]
    impl CredentialVault for StubVault {
        async fn store(&self, _credential: Credential, _data: CredentialData) -> Result<CredentialId, CredentialError> {
            unimplemented!()
        }

        async fn get_metadata(&self, _id: CredentialId) -> Result<Credential, CredentialError> {
            unimplemented!()
        }

        async fn get_data(&self, id: CredentialId) -> Result<CredentialData, CredentialError> {
            self.data
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or(CredentialError::NotFound { id })
        }

        async fn update_data(&self, _id: CredentialId, _data: CredentialData) -> Result<(), CredentialError> {
            unimplemented!()
        }

        async fn delete(&self, _id: CredentialId) -> Result<(), CredentialError> {
            unimplemented!()
        }

        async fn list_for_user(&self, _user_id: UserId) -> Result<Vec<Credential>, CredentialError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn open_with_no_node_returns_local_driver() {
        let vault = Arc::new(StubVault {
            data: Mutex::new(HashMap::new()),
        });
        let factory = DefaultDriverFactory::new(vault, "/tmp");
        let driver = factory.open(None).await.unwrap();
        assert!(!driver.is_remote());
    }

    #[tokio::test]
    async fn open_for_ssh_node_with_missing_credential_fails() {
        let vault = Arc::new(StubVault {
            data: Mutex::new(HashMap::new()),
        });
        let factory = DefaultDriverFactory::new(vault, "/tmp");
        let node = flowctl_flow::Node {
            id: flowctl_core::NodeId::new(),
            namespace_id: flowctl_core::NamespaceId::new(),
            name: "web-1".into(),
            hostname: "10.0.0.5".into(),
            port: 22,
            username: "deploy".into(),
            os_family: flowctl_flow::OsFamily::Linux,
            connection_type: ConnectionType::Ssh,
            tags: vec![],
            credential_id: CredentialId::new(),
            skip_cert_verification: false,
        };
        let result = factory.open(Some(&node)).await;
        assert!(result.is_err());
    }

    #[allow(dead_code)]
    fn credential_type_is_exhaustive(t: CredentialType) -> bool {
        matches!(t, CredentialType::Password | CredentialType::PrivateKey)
    }
}
