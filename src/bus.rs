use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::{Cancel, Module, ModuleError};
use crate::devices::{Adc, BusDevice, Dac, DeviceError};
use crate::protocol::{
    Command, NodeInfo, ProtocolError, Verb, MAX_LINE_SIZE, WELCOME_BANNER,
};
use crate::registry::{Registry, RegistryError};
use crate::transport::{PeerConfig, TcpTransport, Transport, TransportError};

/// Most nodes a single bus segment can carry.
pub const MAX_NODES: usize = 8;

/// Deadline for any single read during discovery and in the command loop.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Request/reply envelope. Created by a caller, consumed by the command loop,
/// fulfilled exactly once, then discarded.
pub struct Message {
    pub req: Command,
    pub reply: oneshot::Sender<Result<Command, BusError>>,
}

/// The hardware command bus. Two implementations share this contract: the
/// transport-backed [`CanBus`] and the in-memory [`MockBus`], selected by
/// [`create_bus`] at construction time.
///
/// [`MockBus`]: crate::mock::MockBus
#[async_trait]
pub trait Bus: Send + Sync {
    fn name(&self) -> &str;
    fn adc(&self) -> Arc<Adc>;
    fn dac(&self) -> Arc<Dac>;

    /// Issues one request and waits for its reply. Concurrent callers are
    /// serialized: the peer observes one full request/reply exchange at a
    /// time, in queue order.
    async fn send(&self, req: Command) -> Result<Command, BusError>;
}

/// Bus flavor picked at construction time.
pub enum BusConfig {
    Tcp { peer: PeerConfig },
    Mock,
}

/// Builds a bus, registers it and its devices in the registry and adds the
/// bus module to the app lifecycle.
pub fn create_bus(
    name: &str,
    config: BusConfig,
    adc: Arc<Adc>,
    dac: Arc<Dac>,
    registry: &Arc<Registry>,
    app: &mut crate::app::App,
) -> Result<Arc<dyn Bus>, RegistryError> {
    registry.register_adc(adc.clone())?;
    registry.register_dac(dac.clone())?;
    match config {
        BusConfig::Tcp { peer } => {
            let bus = CanBus::new(name, Box::new(TcpTransport::new(peer)), adc, dac);
            registry.register_bus(name, bus.clone())?;
            app.add_module(bus.clone());
            Ok(bus)
        }
        BusConfig::Mock => {
            let bus = crate::mock::MockBus::new(name, adc, dac);
            registry.register_bus(name, bus.clone())?;
            app.add_module(bus.clone());
            Ok(bus)
        }
    }
}

/// Transport-backed bus engine.
///
/// Boot opens the transport, checks the welcome banner, discovers the
/// attached nodes and resolves them against the registered device serials,
/// then spawns the command loop. The loop is the sole owner of the transport
/// from that point on; it drains the request queue one message at a time,
/// which is what serializes concurrent callers.
pub struct CanBus {
    name: String,
    adc: Arc<Adc>,
    dac: Arc<Dac>,
    devices: Vec<Arc<dyn BusDevice>>,
    queue: mpsc::UnboundedSender<Message>,
    // set once the command loop owns the queue receiver; before that a
    // queued message would never be consumed
    ready: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    queue_rx: Option<mpsc::UnboundedReceiver<Message>>,
    nodes: heapless::Vec<u8, MAX_NODES>,
    loop_task: Option<JoinHandle<Box<dyn Transport>>>,
}

impl CanBus {
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        adc: Arc<Adc>,
        dac: Arc<Dac>,
    ) -> Arc<Self> {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let devices: Vec<Arc<dyn BusDevice>> =
            vec![adc.clone() as Arc<dyn BusDevice>, dac.clone() as Arc<dyn BusDevice>];
        Arc::new(Self {
            name: name.into(),
            adc,
            dac,
            devices,
            queue,
            ready: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                transport: Some(transport),
                queue_rx: Some(queue_rx),
                nodes: heapless::Vec::new(),
                loop_task: None,
            }),
        })
    }

    /// Node ids discovered during boot, in arrival order.
    pub async fn nodes(&self) -> Vec<u8> {
        self.inner.lock().await.nodes.to_vec()
    }

    async fn boot_bus(&self, cancel: &Cancel) -> Result<(), BusError> {
        info!(bus = %self.name, "boot...");
        let mut inner = self.inner.lock().await;
        let mut transport = inner.transport.take().ok_or(BusError::BadState)?;
        let queue_rx = inner.queue_rx.take().ok_or(BusError::BadState)?;

        match self.handshake(&mut inner, transport.as_mut(), cancel).await {
            Ok(()) => {}
            Err(err) => {
                error!(bus = %self.name, "boot failed: {err}");
                let _ = transport.close().await;
                return Err(err);
            }
        }

        for dev in &self.devices {
            dev.init(self).await?;
        }

        let name = self.name.clone();
        let cancel = cancel.clone();
        inner.loop_task = Some(tokio::spawn(command_loop(
            name, transport, queue_rx, cancel,
        )));
        self.ready.store(true, Ordering::Release);

        info!(bus = %self.name, "boot... [done]");
        Ok(())
    }

    async fn handshake(
        &self,
        inner: &mut Inner,
        transport: &mut dyn Transport,
        cancel: &Cancel,
    ) -> Result<(), BusError> {
        transport.open().await?;
        let mut lines = LineBuffer::new();

        // Exactly one welcome line comes first; anything else is a protocol
        // mismatch, not retried.
        let banner = read_line(transport, &mut lines, cancel).await?;
        let banner = String::from_utf8_lossy(&banner);
        if !banner.starts_with(WELCOME_BANNER) {
            return Err(ProtocolError::BadBanner(banner.into_owned()).into());
        }
        debug!(bus = %self.name, "welcome banner ok");

        // The peer pushes one `boot` line per node as it initializes.
        while inner.nodes.len() < self.devices.len() {
            let line = read_line(transport, &mut lines, cancel).await?;
            let Some(cmd) = Command::decode(&line) else {
                debug!(bus = %self.name, "ignoring: {:?}", String::from_utf8_lossy(&line));
                continue;
            };
            match cmd.verb {
                Verb::Boot => {
                    let id = u8::from_str_radix(cmd.data.trim(), 16)
                        .map_err(|_| ProtocolError::MalformedPayload(cmd.data.clone()))?;
                    info!(bus = %self.name, node = id, "node online");
                    inner.nodes.push(id).map_err(|_| BusError::TooManyNodes)?;
                }
                _ => {
                    return Err(ProtocolError::UnexpectedCommand(cmd.to_string()).into());
                }
            }
        }

        // Ask each node who it is and match serials to our device handles.
        for &id in inner.nodes.iter() {
            let req = Command::new(Verb::Info, format!("{id:x}"));
            transport.write_all(&req.encode()).await?;

            let line = read_line(transport, &mut lines, cancel).await?;
            let cmd = Command::decode(&line).ok_or_else(|| {
                ProtocolError::UnexpectedCommand(String::from_utf8_lossy(&line).into_owned())
            })?;
            if cmd.verb != Verb::Info {
                return Err(ProtocolError::UnexpectedCommand(cmd.to_string()).into());
            }
            let node = NodeInfo::parse(&cmd.data)?;
            info!(bus = %self.name, node = node.id, serial = %node.serial, "node identified");

            match self.devices.iter().find(|d| d.serial() == node.serial) {
                Some(dev) => {
                    dev.assign_node(node.id)?;
                    info!(bus = %self.name, device = dev.name(), node = node.id, "device resolved");
                }
                None => {
                    warn!(bus = %self.name, serial = %node.serial, "serial matches no registered device");
                }
            }
        }

        for dev in &self.devices {
            if dev.node().is_none() {
                return Err(BusError::Unresolved(dev.name().to_owned()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Bus for CanBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn adc(&self) -> Arc<Adc> {
        self.adc.clone()
    }

    fn dac(&self) -> Arc<Dac> {
        self.dac.clone()
    }

    async fn send(&self, req: Command) -> Result<Command, BusError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(Message { req, reply })
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)?
    }
}

#[async_trait]
impl Module for CanBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn boot(&self, cancel: &Cancel) -> Result<(), ModuleError> {
        self.boot_bus(cancel).await?;
        Ok(())
    }

    async fn shutdown(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        info!(bus = %self.name, "shutdown...");
        // Two-phase: quit over the queue first, so the loop relinquishes the
        // connection before we close it.
        match self.send(Command::bare(Verb::Quit)).await {
            Ok(_) | Err(BusError::Closed) => {}
            Err(err) => return Err(err.into()),
        }

        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.loop_task.take() {
            if let Ok(mut transport) = task.await {
                transport.close().await.map_err(BusError::from)?;
            }
        }
        if let Some(mut transport) = inner.transport.take() {
            // never booted; release the transport anyway
            let _ = transport.close().await;
        }
        info!(bus = %self.name, "shutdown... [done]");
        Ok(())
    }
}

/// Single consumer of the request queue and sole owner of the transport.
/// Exits on a `quit` request, an external cancel, a closed queue or a
/// transport failure; on every exit path each remaining caller is answered,
/// and the transport is handed back for closing.
async fn command_loop(
    name: String,
    mut transport: Box<dyn Transport>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    cancel: Cancel,
) -> Box<dyn Transport> {
    let mut lines = LineBuffer::new();
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = cancel.cancelled() => {
                debug!(bus = %name, "quit...");
                break;
            }
        };

        if let Err(err) = transport.write_all(&msg.req.encode()).await {
            error!(bus = %name, "error sending {}: {err}", msg.req);
            let _ = msg.reply.send(Err(err.into()));
            break;
        }

        if msg.req.verb == Verb::Quit {
            // No reply line follows a quit; answer the caller right away.
            let _ = msg.reply.send(Ok(msg.req));
            break;
        }

        match read_reply(transport.as_mut(), &mut lines).await {
            Ok(reply) => {
                let _ = msg.reply.send(Ok(reply));
            }
            Err(err) => {
                error!(bus = %name, "error receiving reply: {err}");
                let _ = msg.reply.send(Err(err));
                break;
            }
        }
    }

    // A broken or quit bus is terminal; flush every queued caller.
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        let _ = msg.reply.send(Err(BusError::Closed));
    }
    transport
}

async fn read_reply(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
) -> Result<Command, BusError> {
    loop {
        if let Some(line) = lines.next_line() {
            match Command::decode(&line) {
                Some(cmd) => return Ok(cmd),
                None => {
                    return Err(ProtocolError::UnexpectedCommand(
                        String::from_utf8_lossy(&line).into_owned(),
                    )
                    .into())
                }
            }
        }
        let mut chunk = [0u8; MAX_LINE_SIZE];
        let n = tokio::time::timeout(READ_TIMEOUT, transport.read(&mut chunk))
            .await
            .map_err(|_| TransportError::ReadTimeout)??;
        lines.extend(&chunk[..n]);
    }
}

async fn read_line(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    cancel: &Cancel,
) -> Result<Vec<u8>, BusError> {
    loop {
        if let Some(line) = lines.next_line() {
            return Ok(line);
        }
        let mut chunk = [0u8; MAX_LINE_SIZE];
        let n = tokio::select! {
            read = tokio::time::timeout(READ_TIMEOUT, transport.read(&mut chunk)) => {
                match read {
                    Ok(result) => result?,
                    Err(_) => return Err(TransportError::ReadTimeout.into()),
                }
            }
            _ = cancel.cancelled() => return Err(BusError::Cancelled),
        };
        lines.extend(&chunk[..n]);
    }
}

/// Splits the raw byte stream into newline-terminated lines; a single read
/// may carry several lines or a partial one.
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let rest = self.buf.split_off(pos + 1);
        let line = std::mem::replace(&mut self.buf, rest);
        Some(line)
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("bus is closed")]
    Closed,

    #[error("bus boot was cancelled")]
    Cancelled,

    #[error("discovered more nodes than the bus can track")]
    TooManyNodes,

    #[error("device {0:?} was not resolved during discovery")]
    Unresolved(String),

    #[error("bus is not in a bootable state")]
    BadState,
}
