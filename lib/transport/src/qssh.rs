//! The QUIC-SSH driver: the same logical node operations as `SshDriver`,
//! carried over a QUIC transport instead of TCP.
//!
//! There is no standard "SSH over QUIC" wire format, so this driver defines
//! its own minimal framed protocol: each request is a length-prefixed
//! `serde_json`-encoded `Frame` sent on a freshly opened bidirectional
//! stream, answered by exactly one length-prefixed `Frame` response. A node
//! configured for `qssh` runs the matching frame-handling agent instead of
//! (or in front of) sshd.

use crate::error::DriverError;
use async_trait::async_trait;
use flowctl_flow::{ExecOutput, NodeDriver};
use quinn::{ClientConfig, Connection, Endpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Upload { remote_path: String, bytes: Vec<u8> },
    Download { remote_path: String },
    FileBytes { bytes: Vec<u8> },
    ListFiles { dir: String },
    FileNames { names: Vec<String> },
    Exec { cmd: String, stdin: Option<Vec<u8>> },
    ExecResult { stdout: String, stderr: String, exit_code: i32 },
    Ack,
    Error { reason: String },
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

/// Skips certificate verification entirely, for nodes registered with a
/// self-signed certificate and no other trust anchor.
#[derive(Debug)]
struct SkipServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A connection to one remote node over QUIC, carrying SSH-equivalent
/// file-transfer and exec semantics in a private frame protocol.
pub struct QsshDriver {
    node_name: String,
    connection: Connection,
}

impl QsshDriver {
    /// Connects to `hostname:port`. When `skip_cert_verification` is set,
    /// the server's certificate is trusted unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::NodeUnreachable` if the handshake fails or
    /// does not complete within 5s.
    pub async fn connect(
        node_name: &str,
        hostname: &str,
        port: u16,
        skip_cert_verification: bool,
    ) -> Result<Self, flowctl_flow::ExecutionError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(
            rustls_native_certs::load_native_certs()
                .certs
                .into_iter(),
        );

        let mut crypto = if skip_cert_verification {
            rustls::ClientConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()
                .map_err(|e| conn_err(node_name, e))?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| conn_err(node_name, e))?
                .with_root_certificates(roots)
                .with_no_client_auth()
        };
        crypto.alpn_protocols = vec![b"qssh/1".to_vec()];

        let client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto).map_err(|e| conn_err(node_name, e))?,
        ));

        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap()).map_err(|e| conn_err(node_name, e))?;
        endpoint.set_default_client_config(client_config);

        let addr = format!("{hostname}:{port}")
            .parse()
            .map_err(|e| conn_err(node_name, format!("invalid address: {e}")))?;

        let connecting = endpoint
            .connect(addr, hostname)
            .map_err(|e| conn_err(node_name, e))?;

        let connection = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| conn_err(node_name, "handshake timed out after 5s"))?
            .map_err(|e| conn_err(node_name, e))?;

        Ok(Self {
            node_name: node_name.to_string(),
            connection,
        })
    }

    async fn roundtrip(&self, request: Frame) -> Result<Frame, flowctl_flow::ExecutionError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;

        let bytes = serde_json::to_vec(&request).expect("Frame serializes");
        send.write_all(&(bytes.len() as u32).to_be_bytes())
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;
        send.write_all(&bytes).await.map_err(|e| conn_err(&self.node_name, e))?;
        send.finish().map_err(|e| conn_err(&self.node_name, e))?;

        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        recv.read_exact(&mut body)
            .await
            .map_err(|e| conn_err(&self.node_name, e))?;

        serde_json::from_slice(&body).map_err(|e| conn_err(&self.node_name, e))
    }
}

#[async_trait]
impl NodeDriver for QsshDriver {
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), flowctl_flow::ExecutionError> {
        let bytes = tokio::fs::read(local_path).await.map_err(|e| conn_err(&self.node_name, e))?;
        match self
            .roundtrip(Frame::Upload {
                remote_path: remote_path.to_string(),
                bytes,
            })
            .await?
        {
            Frame::Ack => Ok(()),
            Frame::Error { reason } => Err(conn_err(&self.node_name, reason)),
            _ => Err(conn_err(&self.node_name, "unexpected response to upload")),
        }
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), flowctl_flow::ExecutionError> {
        match self
            .roundtrip(Frame::Download {
                remote_path: remote_path.to_string(),
            })
            .await?
        {
            Frame::FileBytes { bytes } => {
                if let Some(parent) = local_path.parent() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
                tokio::fs::write(local_path, bytes)
                    .await
                    .map_err(|e| conn_err(&self.node_name, e))
            }
            Frame::Error { reason } => Err(conn_err(&self.node_name, reason)),
            _ => Err(conn_err(&self.node_name, "unexpected response to download")),
        }
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>, flowctl_flow::ExecutionError> {
        match self.roundtrip(Frame::ListFiles { dir: dir.to_string() }).await {
            Ok(Frame::FileNames { names }) => Ok(names),
            Ok(_) | Err(_) => Ok(Vec::new()),
        }
    }

    async fn exec(
        &self,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput, flowctl_flow::ExecutionError> {
        match self
            .roundtrip(Frame::Exec {
                cmd: cmd.to_string(),
                stdin: stdin.map(<[u8]>::to_vec),
            })
            .await?
        {
            Frame::ExecResult {
                stdout,
                stderr,
                exit_code,
            } => Ok(ExecOutput {
                stdout,
                stderr,
                exit_code,
            }),
            Frame::Error { reason } => Err(conn_err(&self.node_name, reason)),
            _ => Err(conn_err(&self.node_name, "unexpected response to exec")),
        }
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
        self.connection.close(0u32.into(), b"execution complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_json() {
        let frame = Frame::Exec {
            cmd: "uname -a".into(),
            stdin: None,
        };
        let bytes = serde_json::to_vec(&frame).unwrap();
        let parsed: Frame = serde_json::from_slice(&bytes).unwrap();
        match parsed {
            Frame::Exec { cmd, .. } => assert_eq!(cmd, "uname -a"),
            _ => panic!("wrong frame variant"),
        }
    }
}
