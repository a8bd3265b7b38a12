//! Condvar-backed packet queues
//!
//! Queues are the only hand-off between workers. Two discard policies:
//!
//! - **Keep-latest** (camera channels): a push replaces whatever is still
//!   unconsumed, so a slow consumer always sees the newest frame.
//! - **FIFO** (everything else): bounded; on overflow the oldest entry is
//!   dropped so a stalled consumer cannot grow memory without limit.

use crate::streaming::packet::Packet;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared handle to a queue
pub type QueueHandle = Arc<PacketQueue>;

/// Discard policy applied on push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    KeepLatest,
    Fifo { capacity: usize },
}

pub struct PacketQueue {
    name: String,
    policy: QueuePolicy,
    items: Mutex<VecDeque<Packet>>,
    ready: Condvar,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub fn new(name: impl Into<String>, policy: QueuePolicy) -> QueueHandle {
        Arc::new(Self {
            name: name.into(),
            policy,
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn keep_latest(name: impl Into<String>) -> QueueHandle {
        Self::new(name, QueuePolicy::KeepLatest)
    }

    pub fn fifo(name: impl Into<String>, capacity: usize) -> QueueHandle {
        Self::new(
            name,
            QueuePolicy::Fifo {
                capacity: capacity.max(1),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a packet, applying the discard policy
    ///
    /// Returns the number of packets discarded to make room.
    pub fn push(&self, packet: Packet) -> usize {
        let discarded = {
            let mut items = self.items.lock();
            let discarded = match self.policy {
                QueuePolicy::KeepLatest => {
                    let n = items.len();
                    items.clear();
                    n
                }
                QueuePolicy::Fifo { capacity } => {
                    let mut n = 0;
                    while items.len() >= capacity {
                        items.pop_front();
                        n += 1;
                    }
                    n
                }
            };
            items.push_back(packet);
            discarded
        };

        if discarded > 0 {
            self.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
            if matches!(self.policy, QueuePolicy::Fifo { .. }) {
                log::debug!("Queue {} full, dropped {} oldest", self.name, discarded);
            }
        }
        self.ready.notify_one();
        discarded
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<Packet> {
        self.items.lock().pop_front()
    }

    /// Pop, waiting up to `timeout` for a packet to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(packet) = items.pop_front() {
                return Some(packet);
            }
            if self.ready.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<Packet> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Packets discarded by the policy since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketQueue")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}
