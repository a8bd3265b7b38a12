//! Tag-based packet dispatch
//!
//! A [`RoutingTable`] maps each tag to an ordered set of destination queues.
//! `cam` packets are routed by device id (`metadata`) instead, so each camera
//! feeds only the queues registered for it. The table is assembled once with
//! [`RoutingTableBuilder`] and never changes afterwards.

use crate::streaming::packet::{Packet, Tag};
use crate::streaming::queue::QueueHandle;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct RoutingTable {
    routes: HashMap<Tag, Vec<QueueHandle>>,
    cameras: HashMap<String, Vec<QueueHandle>>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    /// Destinations for a packet; empty when nothing is registered
    pub fn destinations(&self, packet: &Packet) -> &[QueueHandle] {
        let found = if packet.tag == Tag::Cam {
            self.cameras.get(&packet.metadata)
        } else {
            self.routes.get(&packet.tag)
        };
        found.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tags with at least one destination (excluding cameras)
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.routes.keys()
    }

    /// Camera device ids with at least one destination
    pub fn cameras(&self) -> impl Iterator<Item = &str> {
        self.cameras.keys().map(String::as_str)
    }
}

/// Assembles a [`RoutingTable`]
#[derive(Default)]
pub struct RoutingTableBuilder {
    table: RoutingTable,
}

impl RoutingTableBuilder {
    /// Add `queue` as a destination for `tag`
    ///
    /// Registering the same queue twice for a tag has no effect.
    pub fn route(mut self, tag: Tag, queue: &QueueHandle) -> Self {
        push_unique(self.table.routes.entry(tag).or_default(), queue);
        self
    }

    /// Add `queue` as a destination for frames from camera `device`
    pub fn route_camera(mut self, device: &str, queue: &QueueHandle) -> Self {
        push_unique(
            self.table.cameras.entry(device.to_string()).or_default(),
            queue,
        );
        self
    }

    pub fn build(self) -> RoutingTable {
        self.table
    }
}

fn push_unique(list: &mut Vec<QueueHandle>, queue: &QueueHandle) {
    if !list.iter().any(|q| Arc::ptr_eq(q, queue)) {
        list.push(Arc::clone(queue));
    }
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub dispatched: u64,
    pub unrouted: u64,
}

/// Fans packets out to their destination queues
pub struct PacketRouter {
    table: RoutingTable,
    dispatched: AtomicU64,
    unrouted: AtomicU64,
}

impl PacketRouter {
    pub fn new(table: RoutingTable) -> Self {
        let mut tags: Vec<String> = table.tags().map(Tag::to_string).collect();
        tags.sort();
        let mut cameras: Vec<&str> = table.cameras().collect();
        cameras.sort_unstable();
        log::debug!("Routing tags {:?}, cameras {:?}", tags, cameras);
        Self {
            table,
            dispatched: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Deliver a copy of `packet` to every destination
    ///
    /// Returns the number of queues reached. Packets with no destination
    /// are dropped quietly.
    pub fn dispatch(&self, packet: Packet) -> usize {
        let destinations = self.table.destinations(&packet);
        let Some((last, rest)) = destinations.split_last() else {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "No route for {} packet (metadata {:?}), dropped",
                packet.tag,
                packet.metadata
            );
            return 0;
        };

        for queue in rest {
            queue.push(packet.clone());
        }
        last.push(packet);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        destinations.len()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::queue::PacketQueue;
    use serde_json::json;

    #[test]
    fn test_fan_out_reaches_exactly_registered_queues() {
        let inbox = PacketQueue::fifo("inbox", 8);
        let telemetry = PacketQueue::fifo("telemetry", 8);
        let actuators = PacketQueue::fifo("actuators", 8);

        let router = PacketRouter::new(
            RoutingTable::builder()
                .route(Tag::Sensor, &inbox)
                .route(Tag::Sensor, &telemetry)
                .route(Tag::MotorData, &actuators)
                .route(Tag::Sensor, &inbox)
                .build(),
        );

        assert_eq!(router.dispatch(Packet::new(Tag::Sensor, json!({"temp": 1}))), 2);
        assert_eq!(inbox.len(), 1);
        assert_eq!(telemetry.len(), 1);
        assert!(actuators.is_empty());

        assert_eq!(router.dispatch(Packet::new(Tag::MotorData, json!([0.0]))), 1);
        assert_eq!(actuators.len(), 1);
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_unknown_tag_dropped() {
        let inbox = PacketQueue::fifo("inbox", 8);
        let router = PacketRouter::new(RoutingTable::builder().route(Tag::Log, &inbox).build());

        assert_eq!(router.dispatch(Packet::new("coralHealth", json!(0.9))), 0);
        assert_eq!(router.dispatch(Packet::new(Tag::GripData, json!(1))), 0);
        assert!(inbox.is_empty());
        assert_eq!(
            router.stats(),
            RouterStats {
                dispatched: 0,
                unrouted: 2
            }
        );
    }

    #[test]
    fn test_camera_routed_by_device() {
        let main = PacketQueue::keep_latest("cam/mainCam");
        let backup = PacketQueue::keep_latest("cam/bkpCam1");
        let router = PacketRouter::new(
            RoutingTable::builder()
                .route_camera("mainCam", &main)
                .route_camera("bkpCam1", &backup)
                .build(),
        );

        router.dispatch(Packet::new(Tag::Cam, json!({"n": 1})).with_metadata("mainCam"));
        router.dispatch(Packet::new(Tag::Cam, json!({"n": 2})).with_metadata("mainCam"));
        assert_eq!(main.len(), 1);
        assert_eq!(main.try_pop().unwrap().data["n"], 2);
        assert!(backup.is_empty());

        assert_eq!(
            router.dispatch(Packet::new(Tag::Cam, json!({})).with_metadata("bkpCam7")),
            0
        );
        assert_eq!(router.stats().unrouted, 1);
    }

    #[test]
    fn test_destinations_receive_independent_copies() {
        let a = PacketQueue::fifo("a", 4);
        let b = PacketQueue::fifo("b", 4);
        let router = PacketRouter::new(
            RoutingTable::builder()
                .route(Tag::StateChange, &a)
                .route(Tag::StateChange, &b)
                .build(),
        );
        router.dispatch(Packet::state_change("stop-motors", json!(null)));

        let mut first = a.try_pop().unwrap();
        first.metadata.push_str("-mutated");
        assert_eq!(b.try_pop().unwrap().metadata, "stop-motors");
    }
}
