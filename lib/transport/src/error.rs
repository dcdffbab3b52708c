//! Error types for the transport crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `DriverError`: errors from a single node driver operation
//! - `CredentialError`: errors from credential storage/retrieval
//! - `TransportError`: high-level wrapper for context

use flowctl_core::CredentialId;
use std::fmt;

/// Errors from a node driver operation (connect, transfer, exec, close).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// TCP or QUIC handshake failed within `check_connectivity`'s 5s bound.
    ConnectionFailed { node_name: String, reason: String },
    /// SSH/QUIC-SSH auth was rejected.
    AuthenticationFailed { node_name: String, reason: String },
    /// Upload or download failed partway through.
    TransferFailed { path: String, reason: String },
    /// The remote command could not be started or its channel broke.
    ExecFailed { reason: String },
    /// A driver operation did not complete within its bound.
    Timeout { operation: String },
    /// Closing the driver failed; callers should still treat it as closed.
    CloseFailed { reason: String },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { node_name, reason } => {
                write!(f, "connection to '{node_name}' failed: {reason}")
            }
            Self::AuthenticationFailed { node_name, reason } => {
                write!(f, "authentication to '{node_name}' failed: {reason}")
            }
            Self::TransferFailed { path, reason } => {
                write!(f, "transfer of '{path}' failed: {reason}")
            }
            Self::ExecFailed { reason } => write!(f, "remote exec failed: {reason}"),
            Self::Timeout { operation } => write!(f, "driver operation '{operation}' timed out"),
            Self::CloseFailed { reason } => write!(f, "driver close failed: {reason}"),
        }
    }
}

impl std::error::Error for DriverError {}

/// Errors from credential storage/retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    NotFound { id: CredentialId },
    EncryptionFailed { reason: String },
    DecryptionFailed { reason: String },
    InvalidFormat { reason: String },
    StorageFailed { reason: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "credential not found: {id}"),
            Self::EncryptionFailed { reason } => write!(f, "encryption failed: {reason}"),
            Self::DecryptionFailed { reason } => write!(f, "decryption failed: {reason}"),
            Self::InvalidFormat { reason } => write!(f, "invalid credential format: {reason}"),
            Self::StorageFailed { reason } => write!(f, "storage operation failed: {reason}"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// High-level transport errors.
///
/// Use these to add context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Driver operation context (use as context wrapper).
    DriverOperation { node_name: String },
    /// Credential operation context (use as context wrapper).
    CredentialOperation { credential_id: CredentialId },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriverOperation { node_name } => {
                write!(f, "driver operation failed for node '{node_name}'")
            }
            Self::CredentialOperation { credential_id } => {
                write!(f, "credential operation failed for {credential_id}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        let err = DriverError::ConnectionFailed {
            node_name: "web-1".into(),
            reason: "host unreachable".into(),
        };
        assert!(err.to_string().contains("web-1"));
        assert!(err.to_string().contains("host unreachable"));
    }

    #[test]
    fn credential_error_display() {
        let id = CredentialId::new();
        let err = CredentialError::NotFound { id };
        assert!(err.to_string().contains("credential not found"));
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::DriverOperation {
            node_name: "db-primary".into(),
        };
        assert!(err.to_string().contains("db-primary"));
    }
}
