//! Builds the `NodeResolver` and `CredentialVault` from the fixed node
//! inventory in `CoordinatorConfig`. Node/credential management has no
//! queue-visible Postgres table of its own, so both seams are populated
//! once at startup rather than read through a store.

use crate::config::{CredentialSeed, NodeSeed};
use flowctl_core::{CredentialId, NamespaceId, NodeId, UserId};
use flowctl_flow::Node;
use flowctl_transport::{Credential, CredentialData, InMemoryCredentialVault, StaticNodeResolver};
use std::str::FromStr;

/// The credential owner recorded against every seeded node credential.
/// Credential ownership by an individual user is an API-surface concern;
/// this process only needs a stable, non-empty `owner_id`.
fn system_owner_id() -> UserId {
    UserId::new()
}

/// Loads every `NodeSeed` into a fresh vault and resolver pair.
pub async fn provision(
    seeds: &[NodeSeed],
) -> Result<(StaticNodeResolver, InMemoryCredentialVault), String> {
    let vault = InMemoryCredentialVault::new();
    let owner = system_owner_id();
    let mut nodes = Vec::with_capacity(seeds.len());

    for seed in seeds {
        let namespace_id = NamespaceId::from_str(&seed.namespace_id)
            .map_err(|e| format!("node '{}': invalid namespace_id: {e}", seed.name))?;

        let data = match &seed.credential {
            CredentialSeed::Password { password } => CredentialData::password(password.clone()),
            CredentialSeed::PrivateKey {
                private_key_pem,
                passphrase,
            } => CredentialData::private_key(private_key_pem.clone(), passphrase.clone()),
        };

        let credential = Credential::new(owner, seed.username.clone(), seed.name.clone(), seed.credential.credential_type());
        let credential_id: CredentialId = vault
            .store(credential, data)
            .await
            .map_err(|e| format!("node '{}': failed to store credential: {e}", seed.name))?;

        nodes.push(Node {
            id: NodeId::new(),
            namespace_id,
            name: seed.name.clone(),
            hostname: seed.hostname.clone(),
            port: seed.port,
            username: seed.username.clone(),
            os_family: seed.os_family,
            connection_type: seed.connection_type,
            tags: seed.tags.clone(),
            credential_id,
            skip_cert_verification: seed.skip_cert_verification,
        });
    }

    Ok((StaticNodeResolver::new(nodes), vault))
}
