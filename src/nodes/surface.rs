//! Surface node: the operator side of the tether
//!
//! | Worker | Job |
//! |--------|-----|
//! | `sensor-recv` | listen on the sensor port; route `sensor`, `log` and vehicle events |
//! | `video-recv` | listen on the video port; route `cam` frames by device |
//! | `cmd-send` | listen on the command port; send everything queued for the vehicle |
//! | `control` | run the [`ControlLoop`] |
//! | `telemetry` | log operator-facing packets and camera throughput |
//! | `gamepad` | poll the gamepad into the shared [`GamepadState`] |
//!
//! # Routing
//!
//! | Tag | Destinations |
//! |-----|--------------|
//! | `sensor` | control inbox, telemetry |
//! | `stateChange` | control inbox, telemetry |
//! | `settingChange` | control inbox |
//! | `log` | telemetry |
//! | `cam` (control camera) | control inbox, that camera's viewer queue |
//! | `cam` (other devices) | that camera's viewer queue |

use crate::config::AppConfig;
use crate::control::control_loop::{ControlIo, ControlLoop};
use crate::control::mode::Command;
use crate::control::state::GamepadState;
use crate::devices::mock::{IdleGamepad, SimulatedLineDetector};
use crate::devices::{GamepadSource, LineDetector};
use crate::error::Result;
use crate::nodes::{Workers, pump, send_or_skip};
use crate::shutdown::Shutdown;
use crate::streaming::connection::{Connection, LinkSettings};
use crate::streaming::packet::{Packet, Tag};
use crate::streaming::queue::{PacketQueue, QueueHandle};
use crate::streaming::router::{PacketRouter, RoutingTable};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Gamepad polling interval
const GAMEPAD_POLL: Duration = Duration::from_millis(10);

/// How often the telemetry worker summarizes camera throughput
const SUMMARY_INTERVAL: Duration = Duration::from_secs(5);

/// Collaborators the surface node drives
pub struct SurfaceDevices {
    pub detector: Box<dyn LineDetector>,
    pub gamepad: Box<dyn GamepadSource>,
}

impl SurfaceDevices {
    /// Simulated detector and an idle gamepad
    pub fn simulated(config: &AppConfig) -> Self {
        Self {
            detector: Box::new(SimulatedLineDetector::new(
                &config.control,
                &config.simulation,
            )),
            gamepad: Box::new(IdleGamepad),
        }
    }
}

/// Queues owned by the surface node
#[derive(Clone)]
pub struct SurfaceQueues {
    /// Everything the control loop consumes
    pub inbox: QueueHandle,
    /// Packets for the command channel
    pub vehicle: QueueHandle,
    /// Operator-facing packets
    pub telemetry: QueueHandle,
    /// Latest frame per camera, for viewers
    pub cameras: Vec<(String, QueueHandle)>,
}

impl SurfaceQueues {
    pub fn new(config: &AppConfig) -> Self {
        let capacity = config.queues.capacity;
        Self {
            inbox: PacketQueue::fifo("control-inbox", capacity),
            vehicle: PacketQueue::fifo("to-vehicle", capacity),
            telemetry: PacketQueue::fifo("telemetry", capacity),
            cameras: config
                .cameras
                .devices
                .iter()
                .map(|d| (d.clone(), PacketQueue::keep_latest(format!("cam-{}", d))))
                .collect(),
        }
    }

    pub fn routing_table(&self, control_camera: &str) -> RoutingTable {
        let mut builder = RoutingTable::builder()
            .route(Tag::Sensor, &self.inbox)
            .route(Tag::Sensor, &self.telemetry)
            .route(Tag::StateChange, &self.inbox)
            .route(Tag::StateChange, &self.telemetry)
            .route(Tag::SettingChange, &self.inbox)
            .route(Tag::Log, &self.telemetry)
            .route_camera(control_camera, &self.inbox);
        for (device, queue) in &self.cameras {
            builder = builder.route_camera(device, queue);
        }
        builder.build()
    }
}

/// Running surface node
pub struct SurfaceNode {
    pub workers: Workers,
    pub queues: SurfaceQueues,
    pub gamepad: Arc<GamepadState>,
    router: Arc<PacketRouter>,
}

impl SurfaceNode {
    /// Hand an operator packet (command or setting change) to the node
    pub fn submit(&self, packet: Packet) -> usize {
        self.router.dispatch(packet)
    }

    pub fn router(&self) -> &PacketRouter {
        &self.router
    }
}

/// Start every surface worker
pub fn spawn(config: &AppConfig, devices: SurfaceDevices, shutdown: Shutdown) -> Result<SurfaceNode> {
    config.validate()?;
    let net = &config.network;
    let settings = LinkSettings::from(net);
    let queues = SurfaceQueues::new(config);
    let router = Arc::new(PacketRouter::new(
        queues.routing_table(&config.cameras.control_camera),
    ));
    let gamepad = Arc::new(GamepadState::new());
    let tick = config.control.tick_period();
    let mut workers = Workers::new(shutdown.clone());

    let mut control = ControlLoop::new(
        config,
        ControlIo {
            inbox: Arc::clone(&queues.inbox),
            vehicle: Arc::clone(&queues.vehicle),
            telemetry: Arc::clone(&queues.telemetry),
            gamepad: Arc::clone(&gamepad),
        },
        devices.detector,
        shutdown.clone(),
    )?;

    for (name, port) in [("sensor", net.sensor_port), ("video", net.video_port)] {
        let mut conn = Connection::listen(
            name,
            net.bind_addr(port),
            settings.clone(),
            shutdown.clone(),
        )
        .with_events(Arc::clone(&queues.telemetry));
        let router = Arc::clone(&router);
        let poll = settings.read_timeout;
        workers.spawn(&format!("{}-recv", name), move || pump(&mut conn, &router, poll))?;
    }

    let conn = Connection::listen(
        "command",
        net.bind_addr(net.command_port),
        settings.clone(),
        shutdown.clone(),
    )
    .with_events(Arc::clone(&queues.telemetry));
    let outbound = Arc::clone(&queues.vehicle);
    let cmd_shutdown = shutdown.clone();
    workers.spawn("cmd-send", move || {
        send_commands(conn, &outbound, &cmd_shutdown, tick)
    })?;

    workers.spawn("control", move || {
        control.run();
        Ok(())
    })?;

    let telemetry_queues = queues.clone();
    let telemetry_shutdown = shutdown.clone();
    workers.spawn("telemetry", move || {
        log_telemetry(&telemetry_queues, &telemetry_shutdown, tick);
        Ok(())
    })?;

    let mut source = devices.gamepad;
    let state = Arc::clone(&gamepad);
    let retry = settings.reconnect_interval;
    let pad_shutdown = shutdown;
    workers.spawn("gamepad", move || {
        poll_gamepad(source.as_mut(), &state, &pad_shutdown, retry);
        Ok(())
    })?;

    log::info!(
        "Surface node up: sensor {}, video {}, command {}",
        net.sensor_port,
        net.video_port,
        net.command_port
    );

    Ok(SurfaceNode {
        workers,
        queues,
        gamepad,
        router,
    })
}

/// Drain the vehicle queue onto the command channel
///
/// Packets popped while no vehicle is attached are dropped. When a vehicle
/// attaches, the backlog is flushed with only its newest motor frame kept,
/// so thrusters never replay commands queued during the outage. A `close`
/// command is sent if the vehicle is attached, then the node shuts down.
fn send_commands(
    mut conn: Connection,
    queue: &PacketQueue,
    shutdown: &Shutdown,
    poll: Duration,
) -> Result<()> {
    let mut session = conn.sessions();
    'outer: while !shutdown.is_requested() {
        let Some(packet) = queue.pop_timeout(poll) else {
            continue;
        };

        let is_close = Command::from_packet(&packet) == Some(Command::Close);
        if !is_close && !conn.try_connect()? {
            log::trace!("No vehicle attached, dropping {} packet", packet.tag);
            continue;
        }

        let mut pending = vec![packet];
        if conn.sessions() != session {
            session = conn.sessions();
            pending.extend(queue.drain());
            let before = pending.len();
            pending = latest_motor_frame_only(pending);
            if before > pending.len() {
                log::debug!(
                    "Vehicle attached, discarded {} stale motor frames",
                    before - pending.len()
                );
            }
        }

        for packet in &pending {
            if Command::from_packet(packet) == Some(Command::Close) {
                if conn.is_connected() {
                    send_or_skip(&mut conn, packet)?;
                }
                log::info!("Close forwarded, stopping surface node");
                conn.close();
                shutdown.trigger();
                break 'outer;
            }
            send_or_skip(&mut conn, packet)?;
        }
    }
    conn.close();
    Ok(())
}

/// Keep every packet except superseded `motorData` frames, preserving order
fn latest_motor_frame_only(packets: Vec<Packet>) -> Vec<Packet> {
    let newest = packets.iter().rposition(|p| p.tag == Tag::MotorData);
    packets
        .into_iter()
        .enumerate()
        .filter(|(i, p)| p.tag != Tag::MotorData || Some(*i) == newest)
        .map(|(_, p)| p)
        .collect()
}

fn log_telemetry(queues: &SurfaceQueues, shutdown: &Shutdown, poll: Duration) {
    let mut frames: HashMap<&str, u64> = HashMap::new();
    let mut window = Instant::now();

    while !shutdown.is_requested() {
        if let Some(packet) = queues.telemetry.pop_timeout(poll) {
            match packet.tag {
                Tag::StateChange => log::info!(
                    "Event {}: {}",
                    packet.event_name().unwrap_or("?"),
                    packet.data
                ),
                Tag::Log => log::debug!("{} = {}", packet.metadata, packet.data),
                _ => log::trace!("{} {}", packet.tag, packet.data),
            }
        }

        for (device, queue) in &queues.cameras {
            if let Some(frame) = queue.try_pop() {
                *frames.entry(device.as_str()).or_default() += 1;
                log::trace!("Frame from {} ({:.0} ms old)", device, frame.age() * 1000.0);
            }
        }

        if window.elapsed() >= SUMMARY_INTERVAL {
            let secs = window.elapsed().as_secs_f64();
            for (device, queue) in &queues.cameras {
                let count = frames.get(device.as_str()).copied().unwrap_or(0);
                log::debug!(
                    "Camera {}: {:.1} fps shown, {} superseded",
                    device,
                    count as f64 / secs,
                    queue.dropped()
                );
            }
            frames.clear();
            window = Instant::now();
        }
    }
}

fn poll_gamepad(
    source: &mut dyn GamepadSource,
    state: &GamepadState,
    shutdown: &Shutdown,
    retry: Duration,
) {
    while !shutdown.is_requested() {
        if let Err(e) = source.poll(state) {
            // Release everything so a lost pad can't leave thrusters running
            log::warn!("Gamepad read failed: {}", e);
            state.clear();
            if shutdown.wait_timeout(retry) {
                break;
            }
            continue;
        }
        shutdown.wait_timeout(GAMEPAD_POLL);
    }
    state.clear();
}
