//! Node transport for the flow execution engine.
//!
//! This crate provides:
//!
//! - **Node drivers**: Local/SSH/QUIC-SSH implementations of `flowctl_flow::NodeDriver`
//! - **Credential vault**: Encrypted storage for node authentication material
//! - **Executors**: Script/Docker implementations of `flowctl_flow::Executor`
//! - **Driver factory**: Selects and opens the right driver per node

pub mod credential;
pub mod error;
pub mod executor;
pub mod factory;
pub mod local;
pub mod qssh;
pub mod registry;
pub mod ssh;

pub use credential::{Credential, CredentialData, CredentialType, CredentialVault, InMemoryCredentialVault};
pub use error::{CredentialError, DriverError, TransportError};
pub use executor::{DefaultExecutorFactory, DockerExecutor, ScriptExecutor};
pub use factory::DefaultDriverFactory;
pub use local::LocalDriver;
pub use qssh::QsshDriver;
pub use registry::StaticNodeResolver;
pub use ssh::SshDriver;
