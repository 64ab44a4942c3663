//! # TLS Transport Layer
//!
//! Optional TLS wrapping for the framing server.
//!
//! When both a certificate chain and a private key are configured the listener
//! hands every accepted socket to a [`TlsAcceptor`] before the connection is
//! registered. Framing, queueing and close classification are identical for
//! plain and TLS streams.
//!
//! ## Responsibilities
//! - Load PEM certificate chains and PKCS#8 keys into a rustls server config
//! - Generate self-signed pairs for development and tests
//! - Provide a framed TLS client for tools and tests

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::core::codec::FrameCodec;
use crate::error::{Result, ServerError};

/// TLS server configuration
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsServerConfig {
    /// Create a new TLS server configuration
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    /// Generate a self-signed certificate for development/testing purposes
    pub fn generate_self_signed<P: AsRef<Path>>(cert_path: P, key_path: P) -> io::Result<Self> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| io::Error::other(format!("Certificate generation error: {e}")))?;

        let mut cert_file = File::create(&cert_path)?;
        cert_file.write_all(cert.cert.pem().as_bytes())?;

        let mut key_file = File::create(&key_path)?;
        key_file.write_all(cert.signing_key.serialize_pem().as_bytes())?;

        Ok(Self::new(cert_path, key_path))
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Load the rustls server configuration from the PEM files
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_chain = load_certs(&self.cert_path)?;

        let key_file = File::open(&self.key_path)
            .map_err(|e| ServerError::TlsError(format!("Failed to open key file: {e}")))?;
        let mut key_reader = BufReader::new(key_file);
        let mut keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|_| ServerError::TlsError("Failed to parse private key".into()))?;

        if keys.is_empty() {
            return Err(ServerError::TlsError("No private keys found".into()));
        }
        let private_key = PrivateKey(keys.swap_remove(0));

        // with_safe_defaults() restricts to TLS 1.2+ with modern suites
        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ServerError::TlsError(format!("TLS error: {e}")))
    }

    /// Build an acceptor ready to wrap accepted sockets
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        let config = self.load_server_config()?;
        debug!(cert = %self.cert_path.display(), "TLS server config loaded");
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let cert_file = File::open(path)
        .map_err(|e| ServerError::TlsError(format!("Failed to open cert file: {e}")))?;
    let mut cert_reader = BufReader::new(cert_file);
    let chain = certs(&mut cert_reader)
        .map_err(|_| ServerError::TlsError("Failed to parse certificate".into()))?;

    if chain.is_empty() {
        return Err(ServerError::TlsError("No certificates found".into()));
    }
    Ok(chain.into_iter().map(Certificate).collect())
}

/// TLS client configuration trusting an explicit certificate
pub struct TlsClientConfig {
    server_name: String,
    trusted_cert_path: PathBuf,
}

impl TlsClientConfig {
    /// Trust the certificate(s) in `cert_path` when connecting to `server_name`
    pub fn new<S: Into<String>, P: AsRef<Path>>(server_name: S, cert_path: P) -> Self {
        Self {
            server_name: server_name.into(),
            trusted_cert_path: cert_path.as_ref().to_path_buf(),
        }
    }

    /// Load the rustls client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let mut root_store = RootCertStore::empty();
        for cert in load_certs(&self.trusted_cert_path)? {
            root_store.add(&cert).map_err(|e| {
                ServerError::TlsError(format!("Failed to add cert to root store: {e}"))
            })?;
        }

        Ok(ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| ServerError::TlsError("Invalid server name".into()))
    }
}

/// Connect to a TLS framing server
#[instrument(skip(config), fields(address=%addr))]
pub async fn connect(
    addr: &str,
    config: &TlsClientConfig,
) -> Result<Framed<ClientTlsStream<TcpStream>, FrameCodec>> {
    let connector = TlsConnector::from(Arc::new(config.load_client_config()?));

    let stream = TcpStream::connect(addr).await?;
    let domain = config.server_name()?;

    let tls_stream = connector
        .connect(domain, stream)
        .await
        .map_err(|e| ServerError::TlsError(format!("TLS connection failed: {e}")))?;

    Ok(Framed::new(tls_stream, FrameCodec::default()))
}
