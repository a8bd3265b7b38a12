//! One TCP channel between the surface and vehicle nodes
//!
//! # Roles
//!
//! | Role | Establish | On peer loss |
//! |------|-----------|--------------|
//! | Listener | bind once, accept one peer | accept the next peer; rebind if the bind was lost |
//! | Connector | dial `host:port` | drop socket, redial every reconnect interval |
//!
//! Each [`Connection`] owns at most one live socket. Every blocking step has
//! a timeout and re-checks the shutdown token, and the live socket is
//! registered with the token so a shutdown can force-close it.
//!
//! Connection state changes are logged and, when an event queue is attached,
//! published as `stateChange` packets with metadata `connection`.

use crate::config::NetworkConfig;
use crate::error::{Error, FramingError, Result};
use crate::shutdown::Shutdown;
use crate::streaming::packet::Packet;
use crate::streaming::queue::QueueHandle;
use crate::streaming::wire::{FrameCodec, FrameReader};
use serde_json::json;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Accept poll interval for the nonblocking listener
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Timing and size limits for one channel
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub read_timeout: Duration,
    pub frame_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_payload: usize,
}

impl From<&NetworkConfig> for LinkSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            frame_timeout: config.frame_timeout(),
            reconnect_interval: config.reconnect_interval(),
            max_payload: config.max_payload_bytes,
        }
    }
}

/// How the socket is obtained
#[derive(Debug, Clone)]
pub enum Role {
    Listener { bind: String },
    Connector { peer: String },
}

struct Live {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    registration: Option<u64>,
    read_timeout: Duration,
}

pub struct Connection {
    channel: String,
    role: Role,
    settings: LinkSettings,
    shutdown: Shutdown,
    listener: Option<TcpListener>,
    live: Option<Live>,
    codec: FrameCodec,
    reader: FrameReader,
    events: Option<QueueHandle>,
    sessions: u64,
}

impl Connection {
    /// Listener role; tries to bind immediately so `local_addr` is known
    pub fn listen(
        channel: impl Into<String>,
        bind: impl Into<String>,
        settings: LinkSettings,
        shutdown: Shutdown,
    ) -> Self {
        let mut conn = Self::new(
            channel.into(),
            Role::Listener { bind: bind.into() },
            settings,
            shutdown,
        );
        if let Err(e) = conn.bind() {
            log::warn!("[{}] Initial bind failed: {}", conn.channel, e);
        }
        conn
    }

    /// Connector role; dials lazily on first use
    pub fn connect(
        channel: impl Into<String>,
        peer: impl Into<String>,
        settings: LinkSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self::new(
            channel.into(),
            Role::Connector { peer: peer.into() },
            settings,
            shutdown,
        )
    }

    fn new(channel: String, role: Role, settings: LinkSettings, shutdown: Shutdown) -> Self {
        Self {
            codec: FrameCodec::new(settings.max_payload),
            reader: FrameReader::new(settings.max_payload, settings.frame_timeout),
            channel,
            role,
            settings,
            shutdown,
            listener: None,
            live: None,
            events: None,
            sessions: 0,
        }
    }

    /// Publish connection events on `queue`
    pub fn with_events(mut self, queue: QueueHandle) -> Self {
        self.events = Some(queue);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_connected(&self) -> bool {
        self.live.is_some()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Bound address of a listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Address of the current peer
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.live.as_ref().and_then(|l| l.peer)
    }

    /// Number of sessions established so far
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Block until a peer is attached or shutdown is requested
    pub fn ensure_connected(&mut self) -> Result<()> {
        while !self.try_connect()? {}
        Ok(())
    }

    /// One accept or dial attempt, bounded by the reconnect interval
    ///
    /// Returns whether a peer is attached afterwards.
    pub fn try_connect(&mut self) -> Result<bool> {
        self.connect_within(self.settings.reconnect_interval)
    }

    /// One accept or dial attempt lasting at most `wait`, plus the retry
    /// pause after a failed attempt
    fn connect_within(&mut self, wait: Duration) -> Result<bool> {
        if self.live.is_some() {
            return Ok(true);
        }
        if self.shutdown.is_requested() {
            return Err(Error::Shutdown);
        }
        let wait = wait.max(ACCEPT_POLL);
        let attempt = match self.role.clone() {
            Role::Listener { .. } => self.accept_one(wait),
            Role::Connector { peer } => self.dial(&peer, wait),
        };
        match attempt {
            Ok(Some(stream)) => {
                self.attach(stream)?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(Error::Shutdown) => Err(Error::Shutdown),
            Err(e) => {
                log::debug!("[{}] Connection attempt failed: {}", self.channel, e);
                self.emit("retrying", Some(e.to_string()));
                if self.shutdown.wait_timeout(self.settings.reconnect_interval) {
                    return Err(Error::Shutdown);
                }
                Ok(false)
            }
        }
    }

    /// Frame and send one packet
    ///
    /// Makes at most one connection attempt; with no peer attached the
    /// packet is not sent and a transport error is returned. Transport
    /// failures drop the socket; the next call reconnects.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let frame = match self.codec.encode(packet) {
            Ok(frame) => frame,
            Err(Error::Framing(e @ FramingError::Oversized { .. })) => {
                log::warn!("[{}] Not sending {} packet: {}", self.channel, packet.tag, e);
                return Err(Error::Other(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        if !self.try_connect()? {
            return Err(Error::Transport("no peer attached".into()));
        }
        let Some(live) = self.live.as_mut() else {
            return Err(Error::Transport("not connected".into()));
        };

        use std::io::Write;
        let result = live
            .stream
            .write_all(&frame)
            .and_then(|_| live.stream.flush());
        match result {
            Ok(()) => {
                log::trace!("[{}] Sent {} ({} bytes)", self.channel, packet.tag, frame.len());
                Ok(())
            }
            Err(e) => Err(self.fail(Error::Io(e))),
        }
    }

    /// Receive one packet, waiting at most `timeout` for it to start
    ///
    /// `Ok(None)` means nothing arrived, including when no peer attached in
    /// time; a started frame may take up to the frame timeout to complete.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        if !self.connect_within(timeout)? {
            return Ok(None);
        }
        let Some(live) = self.live.as_mut() else {
            return Ok(None);
        };

        let timeout = timeout.max(Duration::from_millis(1));
        if live.read_timeout != timeout {
            live.stream.set_read_timeout(Some(timeout))?;
            live.read_timeout = timeout;
        }

        match self.reader.read_frame(&mut live.stream) {
            Ok(packet) => Ok(packet),
            Err(e) if e.needs_reconnect() => Err(self.fail(e)),
            Err(e) => {
                if let Error::Io(io) = &e
                    && io.kind() != ErrorKind::Interrupted
                {
                    return Err(self.fail(e));
                }
                Err(e)
            }
        }
    }

    /// Half-close for write, then drop the socket
    pub fn close(&mut self) {
        if let Some(live) = self.live.take() {
            let _ = live.stream.shutdown(std::net::Shutdown::Write);
            let _ = live.stream.shutdown(std::net::Shutdown::Both);
            if let Some(id) = live.registration {
                self.shutdown.unregister(id);
            }
            log::info!("[{}] Closed connection to {:?}", self.channel, live.peer);
        }
        self.reader.reset();
    }

    /// Drop the live socket after a failure and report it
    fn fail(&mut self, error: Error) -> Error {
        if self.shutdown.is_requested() {
            self.close();
            return Error::Shutdown;
        }
        let peer = self.peer_addr();
        log::warn!("[{}] Link to {:?} lost: {}", self.channel, peer, error);
        self.close();
        self.emit("lost", Some(error.to_string()));
        match error {
            Error::Io(e) => Error::Transport(e.to_string()),
            other => other,
        }
    }

    fn bind(&mut self) -> Result<()> {
        let Role::Listener { bind } = &self.role else {
            return Ok(());
        };
        let listener = TcpListener::bind(bind)
            .map_err(|e| Error::Transport(format!("bind {}: {}", bind, e)))?;
        listener.set_nonblocking(true)?;
        log::info!(
            "[{}] Listening on {}",
            self.channel,
            listener.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| bind.clone())
        );
        self.listener = Some(listener);
        Ok(())
    }

    /// Wait up to `wait` for a peer
    fn accept_one(&mut self, wait: Duration) -> Result<Option<TcpStream>> {
        if self.listener.is_none() {
            self.bind()?;
        }
        let Some(listener) = self.listener.as_ref() else {
            return Ok(None);
        };

        let waited = std::time::Instant::now();
        while waited.elapsed() < wait {
            if self.shutdown.is_requested() {
                return Err(Error::Shutdown);
            }
            match listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("[{}] Accepted peer {}", self.channel, addr);
                    return Ok(Some(stream));
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    // Listener is unusable; release it so the next attempt rebinds
                    self.listener = None;
                    return Err(Error::Transport(format!("accept: {}", e)));
                }
            }
        }
        Ok(None)
    }

    fn dial(&self, peer: &str, wait: Duration) -> Result<Option<TcpStream>> {
        let addr = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("{} does not resolve", peer)))?;
        let stream = TcpStream::connect_timeout(&addr, wait)
            .map_err(|e| Error::Transport(format!("connect {}: {}", addr, e)))?;
        log::info!("[{}] Connected to {}", self.channel, addr);
        Ok(Some(stream))
    }

    fn attach(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[{}] Failed to set TCP_NODELAY: {}", self.channel, e);
        }
        stream.set_read_timeout(Some(self.settings.read_timeout))?;

        let registration = self.shutdown.register(&stream);
        let peer = stream.peer_addr().ok();
        self.reader.reset();
        self.live = Some(Live {
            stream,
            peer,
            registration,
            read_timeout: self.settings.read_timeout,
        });
        self.sessions += 1;
        self.emit("connected", peer.map(|p| p.to_string()));
        Ok(())
    }

    fn emit(&self, status: &str, detail: Option<String>) {
        if let Some(events) = &self.events {
            events.push(Packet::state_change(
                "connection",
                json!({
                    "channel": self.channel,
                    "status": status,
                    "detail": detail,
                }),
            ));
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
