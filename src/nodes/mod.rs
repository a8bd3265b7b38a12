//! Surface and vehicle processes
//!
//! ```text
//!          SURFACE                                      VEHICLE
//! ┌─────────────────────────┐                ┌─────────────────────────┐
//! │ sensor-recv   (listen) ◄├── sensor 6664 ─┤ sensor-send   (dial)    │
//! │ video-recv    (listen) ◄├── video  6666 ─┤ video-send    (dial)    │
//! │ cmd-send      (listen)  ├── cmd    6665 ►│ cmd-recv      (dial)    │
//! │ control                 │                │ actuators               │
//! │ telemetry               │                │ supervisor              │
//! │ gamepad                 │                │                         │
//! └─────────────────────────┘                └─────────────────────────┘
//! ```
//!
//! Each worker is a named OS thread that only talks to the others through
//! packet queues. Workers report their exit on a channel watched by the main
//! thread; a worker failing outside of shutdown brings the node down.

pub mod surface;
pub mod vehicle;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use crate::streaming::connection::Connection;
use crate::streaming::packet::Packet;
use crate::streaming::router::PacketRouter;
use crossbeam_channel::{Receiver, Sender};
use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Which side of the tether this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Surface,
    Vehicle,
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "surface" => Ok(NodeRole::Surface),
            "vehicle" => Ok(NodeRole::Vehicle),
            other => Err(Error::Config(format!(
                "unknown node role {:?} (expected surface or vehicle)",
                other
            ))),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Surface => f.write_str("surface"),
            NodeRole::Vehicle => f.write_str("vehicle"),
        }
    }
}

/// Sent by every worker when its thread ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub worker: String,
    /// Failure message; `None` for a clean stop
    pub error: Option<String>,
}

/// Sends the exit notice even if the worker panics
struct ExitNotice {
    worker: String,
    error: Option<String>,
    exits: Sender<WorkerExit>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let error = if thread::panicking() {
            Some("panicked".to_string())
        } else {
            self.error.take()
        };
        let _ = self.exits.send(WorkerExit {
            worker: std::mem::take(&mut self.worker),
            error,
        });
    }
}

/// Named worker threads of one node
pub struct Workers {
    shutdown: Shutdown,
    handles: Vec<(String, JoinHandle<()>)>,
    exits_tx: Sender<WorkerExit>,
    exits_rx: Receiver<WorkerExit>,
    failed: Cell<usize>,
}

impl Workers {
    pub fn new(shutdown: Shutdown) -> Self {
        let (exits_tx, exits_rx) = crossbeam_channel::unbounded();
        Self {
            shutdown,
            handles: Vec::new(),
            exits_tx,
            exits_rx,
            failed: Cell::new(0),
        }
    }

    /// Start `work` on a thread called `name`
    ///
    /// `Err(Error::Shutdown)` from the worker counts as a clean stop.
    pub fn spawn<F>(&mut self, name: &str, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let exits = self.exits_tx.clone();
        let worker = name.to_string();
        let handle = thread::Builder::new()
            .name(worker.clone())
            .spawn(move || {
                let mut notice = ExitNotice {
                    worker,
                    error: None,
                    exits,
                };
                log::debug!("Worker {} started", notice.worker);
                match work() {
                    Ok(()) | Err(Error::Shutdown) => {
                        log::debug!("Worker {} stopped", notice.worker);
                    }
                    Err(e) => {
                        log::error!("Worker {} failed: {}", notice.worker, e);
                        notice.error = Some(e.to_string());
                    }
                }
            })
            .map_err(|e| Error::Other(format!("Failed to spawn {}: {}", name, e)))?;
        self.handles.push((name.to_string(), handle));
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Next exit notice, waiting at most `timeout`
    pub fn next_exit(&self, timeout: Duration) -> Option<WorkerExit> {
        let exit = self.exits_rx.recv_timeout(timeout).ok()?;
        if exit.error.is_some() {
            self.failed.set(self.failed.get() + 1);
        }
        Some(exit)
    }

    /// Block until shutdown is requested
    ///
    /// A worker that fails, or stops while the node is still meant to run,
    /// triggers the shutdown.
    pub fn supervise(&self, poll: Duration) {
        while !self.shutdown.is_requested() {
            let Some(exit) = self.next_exit(poll) else {
                continue;
            };
            if self.shutdown.is_requested() {
                break;
            }
            match exit.error {
                Some(e) => log::error!("Worker {} exited: {}; stopping node", exit.worker, e),
                None => log::warn!("Worker {} stopped unexpectedly; stopping node", exit.worker),
            }
            self.shutdown.trigger();
        }
    }

    /// Wait for every worker; returns how many failed or panicked
    pub fn join(mut self) -> usize {
        for (name, handle) in std::mem::take(&mut self.handles) {
            if handle.join().is_err() {
                log::error!("Worker {} panicked", name);
            }
        }
        while self.next_exit(Duration::ZERO).is_some() {}
        self.failed.get()
    }
}

/// Feed everything received on `conn` into `router` until shutdown
///
/// Link failures are left to the connection's reconnect logic; an
/// undecodable frame is skipped.
pub(crate) fn pump(conn: &mut Connection, router: &PacketRouter, poll: Duration) -> Result<()> {
    while !conn.shutdown_requested() {
        match conn.receive(poll) {
            Ok(Some(packet)) => {
                router.dispatch(packet);
            }
            Ok(None) => {}
            Err(Error::Shutdown) => break,
            Err(Error::Decode(e)) => {
                log::warn!("[{}] Skipping undecodable frame: {}", conn.channel(), e);
            }
            Err(e) if e.needs_reconnect() => {
                log::debug!("[{}] Reconnecting: {}", conn.channel(), e);
            }
            Err(e) => {
                log::warn!("[{}] Receive failed: {}", conn.channel(), e);
            }
        }
    }
    conn.close();
    Ok(())
}

/// Send one packet; anything but shutdown is logged and skipped
pub(crate) fn send_or_skip(conn: &mut Connection, packet: &Packet) -> Result<()> {
    match conn.send(packet) {
        Ok(()) => Ok(()),
        Err(Error::Shutdown) => Err(Error::Shutdown),
        Err(e) => {
            log::debug!("[{}] {} packet not sent: {}", conn.channel(), packet.tag, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("surface".parse::<NodeRole>().unwrap(), NodeRole::Surface);
        assert_eq!(NodeRole::Vehicle.to_string(), "vehicle");
        assert!(matches!("rov".parse::<NodeRole>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_worker_exits_are_reported() {
        let shutdown = Shutdown::new();
        let mut workers = Workers::new(shutdown.clone());
        workers.spawn("ok", || Ok(())).unwrap();
        workers.spawn("stopped", || Err(Error::Shutdown)).unwrap();
        workers
            .spawn("broken", || Err(Error::Other("boom".into())))
            .unwrap();
        assert_eq!(workers.len(), 3);
        assert_eq!(workers.names().collect::<Vec<_>>(), ["ok", "stopped", "broken"]);

        let mut exits = Vec::new();
        while exits.len() < 3 {
            exits.push(workers.next_exit(Duration::from_secs(2)).unwrap());
        }
        exits.sort_by(|a, b| a.worker.cmp(&b.worker));
        assert_eq!(exits[0].error.as_deref(), Some("boom"));
        assert_eq!(exits[1].error, None);
        assert_eq!(exits[2].error, None);
        assert_eq!(workers.join(), 1);
    }

    #[test]
    fn test_panic_is_reported() {
        let mut workers = Workers::new(Shutdown::new());
        workers
            .spawn("panics", || -> Result<()> { panic!("worker bug") })
            .unwrap();
        let exit = workers.next_exit(Duration::from_secs(2)).unwrap();
        assert_eq!(exit.error.as_deref(), Some("panicked"));
    }

    #[test]
    fn test_failed_worker_stops_node() {
        let shutdown = Shutdown::new();
        let mut workers = Workers::new(shutdown.clone());
        let waiting = shutdown.clone();
        workers
            .spawn("idle", move || {
                while !waiting.wait_timeout(Duration::from_millis(50)) {}
                Ok(())
            })
            .unwrap();
        workers
            .spawn("broken", || Err(Error::Channel(3)))
            .unwrap();

        workers.supervise(Duration::from_millis(20));
        assert!(shutdown.is_requested());
        assert_eq!(workers.join(), 1);
    }
}
