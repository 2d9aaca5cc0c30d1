use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long `open` waits for the c-wrapper to dial back.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

/// A raw duplex byte stream to the remote c-wrapper peer.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), TransportError>;
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// How to start the c-wrapper on the embedded controller and where it should
/// dial back. The callback host is explicit configuration: hostname-derived
/// addresses are wrong behind NAT or inside a container.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub ssh_host: String,
    pub command: String,
    pub callback_host: String,
    pub port: u16,
}

impl PeerConfig {
    pub fn new(
        ssh_host: impl Into<String>,
        callback_host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            command: "startCWrapper".to_owned(),
            callback_host: callback_host.into(),
            port,
        }
    }
}

/// Transport that launches the remote peer over ssh, then listens on the
/// configured port and accepts exactly one inbound connection.
pub struct TcpTransport {
    config: PeerConfig,
    listener: Option<TcpListener>,
    conn: Option<TcpStream>,
    launcher: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            listener: None,
            conn: None,
            launcher: None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        // The launch and the accept are independent failure points; the
        // launcher reports through this channel so neither is swallowed.
        let (err_tx, mut err_rx) = mpsc::channel::<TransportError>(1);
        let config = self.config.clone();
        self.launcher = Some(tokio::spawn(async move {
            if let Err(err) = launch_peer(&config).await {
                let _ = err_tx.send(err).await;
            }
        }));

        info!(port = self.config.port, "starting tcp server");
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(TransportError::Listen)?;

        info!("waiting for a connection from the c-wrapper");
        let conn = tokio::select! {
            accepted = tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()) => {
                match accepted {
                    Ok(Ok((conn, addr))) => {
                        info!(%addr, "c-wrapper connected");
                        conn
                    }
                    Ok(Err(err)) => return Err(TransportError::Accept(err)),
                    Err(_) => return Err(TransportError::AcceptTimeout),
                }
            }
            Some(err) = err_rx.recv() => return Err(err),
        };

        self.listener = Some(listener);
        self.conn = Some(conn);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        let n = conn.read(buf).await.map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        conn.write_all(buf).await.map_err(TransportError::Io)
    }

    // Idempotent; connection is released before the listener.
    async fn close(&mut self) -> Result<(), TransportError> {
        let mut result = Ok(());
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.shutdown().await {
                result = Err(TransportError::Io(err));
            }
        }
        drop(self.listener.take());
        if let Some(launcher) = self.launcher.take() {
            launcher.abort();
        }
        result
    }
}

async fn launch_peer(config: &PeerConfig) -> Result<(), TransportError> {
    info!(
        host = %config.ssh_host,
        "starting c-wrapper (dial back to {}:{})",
        config.callback_host,
        config.port,
    );

    let status = tokio::process::Command::new("ssh")
        .arg("-X")
        .arg(&config.ssh_host)
        .arg(format!(
            "{} --host={} --port={}",
            config.command, config.callback_host, config.port
        ))
        .env("TERM", "vt100")
        .kill_on_drop(true)
        .status()
        .await
        .map_err(TransportError::Spawn)?;

    if !status.success() {
        warn!(%status, "c-wrapper launch exited");
        return Err(TransportError::PeerExited(status.code().unwrap_or(-1)));
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("error starting tcp server: {0}")]
    Listen(#[source] std::io::Error),

    #[error("error accepting connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("timed out waiting for the c-wrapper to connect")]
    AcceptTimeout,

    #[error("could not launch c-wrapper: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("c-wrapper exited with status {0}")]
    PeerExited(i32),

    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("transport is not connected")]
    NotConnected,

    #[error("read timed out")]
    ReadTimeout,
}
