//! Cooperative shutdown token
//!
//! Workers poll [`Shutdown::is_requested`] every loop iteration and sleep via
//! [`Shutdown::wait_timeout`] so a trigger wakes them immediately. Sockets
//! registered here are force-closed on trigger, which unblocks any worker
//! stuck in a read or write on them.

use parking_lot::{Condvar, Mutex};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    next_id: AtomicU64,
    sockets: Mutex<Vec<(u64, TcpStream)>>,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Relaxed)
    }

    /// Request shutdown; safe to call more than once
    pub fn trigger(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Shutdown requested");

        let sockets: Vec<_> = self.inner.sockets.lock().drain(..).collect();
        for (id, stream) in sockets {
            log::debug!("Force-closing socket #{}", id);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }

        let _guard = self.inner.wake_lock.lock();
        self.inner.wake.notify_all();
    }

    /// Sleep for `timeout` unless shutdown is triggered first
    ///
    /// Returns true when shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.wake_lock.lock();
        while !self.is_requested() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_requested()
    }

    /// Track a socket so `trigger` can close it
    ///
    /// Returns a registration id, or `None` if the handle could not be cloned.
    /// A socket registered after shutdown is closed at once.
    pub fn register(&self, stream: &TcpStream) -> Option<u64> {
        let clone = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Cannot register socket for shutdown: {}", e);
                return None;
            }
        };
        if self.is_requested() {
            let _ = clone.shutdown(std::net::Shutdown::Both);
            return None;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sockets.lock().push((id, clone));
        Some(id)
    }

    pub fn unregister(&self, id: u64) {
        self.inner.sockets.lock().retain(|(sid, _)| *sid != id);
    }

    /// Number of sockets currently tracked
    pub fn registered(&self) -> usize {
        self.inner.sockets.lock().len()
    }
}
