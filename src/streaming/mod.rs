//! Link layer: packets, framing, queues, dispatch and TCP channels

pub mod connection;
pub mod packet;
pub mod queue;
pub mod router;
pub mod wire;

pub use connection::{Connection, LinkSettings, Role};
pub use packet::{Packet, Tag};
pub use queue::{PacketQueue, QueueHandle, QueuePolicy};
pub use router::{PacketRouter, RouterStats, RoutingTable, RoutingTableBuilder};
pub use wire::{FrameCodec, FrameReader};
