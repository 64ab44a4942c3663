//! # TCP Listener
//!
//! Binds the server socket and turns accepted sockets into [`BoxedStream`]s,
//! running the TLS handshake first when the server is configured for TLS.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::core::codec::FrameCodec;
use crate::error::{Result, ServerError};
use crate::transport::tls::TlsServerConfig;
use crate::transport::BoxedStream;

/// Listening socket, optionally wrapping accepted streams in TLS
pub struct FrameListener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl FrameListener {
    /// Bind `addr`; TLS is used when the configuration names both PEM files
    #[instrument(skip(config))]
    pub async fn bind(addr: &str, config: &ServerConfig) -> Result<Self> {
        let tls = match config.tls_paths() {
            Some((cert, key)) => Some(TlsServerConfig::new(cert, key).acceptor()?),
            None => None,
        };

        let inner = TcpListener::bind(addr).await?;
        info!(
            address = %inner.local_addr()?,
            tls = tls.is_some(),
            "Frame server listening"
        );

        Ok(Self { inner, tls })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Wait for the next socket. The TLS handshake is deferred to
    /// [`PendingStream::establish`] so a slow client cannot stall the accept loop.
    pub async fn accept(&self) -> io::Result<PendingStream> {
        let (stream, peer) = self.inner.accept().await?;
        Ok(PendingStream {
            stream,
            peer,
            tls: self.tls.clone(),
        })
    }
}

/// An accepted socket that has not been wrapped yet
pub struct PendingStream {
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl PendingStream {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Finish the transport setup and return a type-erased stream
    pub async fn establish(self) -> Result<BoxedStream> {
        // Responses are written frame by frame
        self.stream.set_nodelay(true)?;

        match self.tls {
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(self.stream)
                    .await
                    .map_err(|e| ServerError::TlsError(format!("TLS handshake failed: {e}")))?;
                Ok(Box::new(tls_stream))
            }
            None => Ok(Box::new(self.stream)),
        }
    }
}

/// Connect a framed plain TCP client
#[instrument]
pub async fn connect(addr: &str) -> Result<Framed<TcpStream, FrameCodec>> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(Framed::new(stream, FrameCodec::default()))
}
