//! Vehicle node: the robot side of the tether
//!
//! | Worker | Job |
//! |--------|-----|
//! | `sensor-send` | dial the sensor port; publish IMU snapshots and vehicle events |
//! | `video-send` | dial the video port; publish one frame per camera per interval |
//! | `cmd-recv` | dial the command port; route motor, grip and operator commands |
//! | `actuators` | apply motor frames and grip commands to the driver |
//! | `supervisor` | act on `close` / `restartCamStream`, publish link status |
//!
//! Actuator channels are checked before any worker starts; an unwired
//! channel aborts startup. At runtime a failing channel is logged and skipped.

use crate::config::{AppConfig, MotorConfig};
use crate::control::mixer::MotorFrame;
use crate::control::mode::Command;
use crate::devices::mock::{RecordingActuators, SimulatedImu, SyntheticCamera};
use crate::devices::{ActuatorDriver, CameraSource, ImuSource};
use crate::error::Result;
use crate::nodes::{Workers, pump, send_or_skip};
use crate::shutdown::Shutdown;
use crate::streaming::connection::{Connection, LinkSettings};
use crate::streaming::packet::{Packet, Tag};
use crate::streaming::queue::{PacketQueue, QueueHandle};
use crate::streaming::router::{PacketRouter, RoutingTable};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Interval between `log/vehicleStatus` reports
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Hardware the vehicle node drives
pub struct VehicleDevices {
    pub imu: Box<dyn ImuSource>,
    pub actuators: Box<dyn ActuatorDriver>,
    pub cameras: Vec<Box<dyn CameraSource>>,
}

impl VehicleDevices {
    /// Noise-driven IMU, in-memory actuators and synthetic cameras
    pub fn simulated(config: &AppConfig) -> Self {
        let motors = &config.motors;
        let wired = motors
            .channels
            .iter()
            .chain(motors.gripper_channel.iter())
            .max()
            .map_or(0, |c| c + 1);
        let seed = config.simulation.random_seed;
        let cameras = config
            .cameras
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| {
                let camera_seed = if seed == 0 { 0 } else { seed + i as u64 + 1 };
                Box::new(SyntheticCamera::new(device, &config.cameras, camera_seed))
                    as Box<dyn CameraSource>
            })
            .collect();
        Self {
            imu: Box::new(SimulatedImu::new(&config.simulation)),
            actuators: Box::new(RecordingActuators::new(wired)),
            cameras,
        }
    }
}

/// Applies received motor and grip packets to an [`ActuatorDriver`]
pub struct ActuatorOutput {
    driver: Box<dyn ActuatorDriver>,
    channels: Vec<usize>,
    gripper: Option<usize>,
    faults: Arc<AtomicU64>,
}

impl ActuatorOutput {
    pub fn new(driver: Box<dyn ActuatorDriver>, motors: &MotorConfig) -> Self {
        Self {
            driver,
            channels: motors.channels.clone(),
            gripper: motors.gripper_channel,
            faults: Arc::new(AtomicU64::new(0)),
        }
    }

    fn all_channels(&self) -> Vec<usize> {
        self.channels.iter().chain(self.gripper.iter()).copied().collect()
    }

    /// Drive every configured channel to neutral, failing on the first
    /// unwired one
    pub fn verify(&mut self) -> Result<()> {
        let channels = self.all_channels();
        self.driver.verify(&channels)?;
        log::info!("Verified {} actuator channels", channels.len());
        Ok(())
    }

    /// Apply one `motorData` or `gripData` packet
    ///
    /// Only malformed data is an error; channel faults are counted and
    /// logged.
    pub fn apply(&mut self, packet: &Packet) -> Result<()> {
        match packet.tag {
            Tag::MotorData => {
                let values: Vec<f32> = serde_json::from_value(packet.data.clone())?;
                let frame = MotorFrame::from_values(values);
                if frame.len() != self.channels.len() {
                    log::debug!(
                        "Motor frame has {} values for {} channels",
                        frame.len(),
                        self.channels.len()
                    );
                }
                for (slot, value) in frame.values().iter().enumerate() {
                    let Some(&channel) = self.channels.get(slot) else {
                        break;
                    };
                    self.set(channel, *value);
                }
            }
            Tag::GripData => {
                let direction: f32 = serde_json::from_value(packet.data.clone())?;
                match self.gripper {
                    Some(channel) => self.set(channel, direction.clamp(-1.0, 1.0)),
                    None => log::debug!("No gripper fitted, ignoring grip {}", direction),
                }
            }
            _ => log::trace!("Actuators ignoring {} packet", packet.tag),
        }
        Ok(())
    }

    /// Drive every channel to neutral
    pub fn neutral(&mut self) {
        for channel in self.all_channels() {
            self.set(channel, 0.0);
        }
    }

    /// Channel writes that failed so far
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    fn set(&mut self, channel: usize, value: f32) {
        if let Err(e) = self.driver.set_channel(channel, value) {
            self.faults.fetch_add(1, Ordering::Relaxed);
            log::warn!("Actuator channel {}: {}", channel, e);
        }
    }
}

/// Queues owned by the vehicle node
#[derive(Clone)]
pub struct VehicleQueues {
    /// Motor frames and grip commands
    pub actuators: QueueHandle,
    /// Operator commands for the supervisor
    pub commands: QueueHandle,
    /// Vehicle events for the surface, sent on the sensor channel
    pub outbox: QueueHandle,
}

impl VehicleQueues {
    pub fn new(config: &AppConfig) -> Self {
        let capacity = config.queues.capacity;
        Self {
            actuators: PacketQueue::fifo("actuators", capacity),
            commands: PacketQueue::fifo("commands", capacity),
            outbox: PacketQueue::fifo("outbox", capacity),
        }
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::builder()
            .route(Tag::MotorData, &self.actuators)
            .route(Tag::GripData, &self.actuators)
            .route(Tag::StateChange, &self.commands)
            .build()
    }
}

/// Running vehicle node
pub struct VehicleNode {
    pub workers: Workers,
    pub queues: VehicleQueues,
    router: Arc<PacketRouter>,
}

impl VehicleNode {
    pub fn router(&self) -> &PacketRouter {
        &self.router
    }
}

/// Verify the actuators, then start every vehicle worker
pub fn spawn(config: &AppConfig, devices: VehicleDevices, shutdown: Shutdown) -> Result<VehicleNode> {
    config.validate()?;
    let mut output = ActuatorOutput::new(devices.actuators, &config.motors);
    output.verify()?;

    let net = &config.network;
    let settings = LinkSettings::from(net);
    let queues = VehicleQueues::new(config);
    let router = Arc::new(PacketRouter::new(queues.routing_table()));
    let restart_cameras = Arc::new(AtomicBool::new(false));
    let poll = settings.read_timeout;
    let mut workers = Workers::new(shutdown.clone());

    let dial = |channel: &str, port: u16| {
        Connection::connect(channel, net.peer_addr(port), settings.clone(), shutdown.clone())
            .with_events(Arc::clone(&queues.outbox))
    };

    let conn = dial("sensor", net.sensor_port);
    let outbox = Arc::clone(&queues.outbox);
    let interval = Duration::from_millis(net.sensor_interval_ms);
    let mut imu = devices.imu;
    let sensor_shutdown = shutdown.clone();
    workers.spawn("sensor-send", move || {
        publish_sensors(conn, imu.as_mut(), &outbox, &sensor_shutdown, interval)
    })?;

    let conn = dial("video", net.video_port);
    let cameras = devices.cameras;
    let restart = Arc::clone(&restart_cameras);
    let outbox = Arc::clone(&queues.outbox);
    let frame_interval = Duration::from_millis(config.cameras.frame_interval_ms);
    let video_shutdown = shutdown.clone();
    workers.spawn("video-send", move || {
        publish_video(conn, cameras, &restart, &outbox, &video_shutdown, frame_interval)
    })?;

    let mut conn = dial("command", net.command_port);
    let cmd_router = Arc::clone(&router);
    workers.spawn("cmd-recv", move || pump(&mut conn, &cmd_router, poll))?;

    let actuator_queue = Arc::clone(&queues.actuators);
    let actuator_shutdown = shutdown.clone();
    let faults = Arc::clone(&output.faults);
    workers.spawn("actuators", move || {
        while !actuator_shutdown.is_requested() {
            if let Some(packet) = actuator_queue.pop_timeout(poll)
                && let Err(e) = output.apply(&packet)
            {
                log::warn!("Bad {} packet: {}", packet.tag, e);
            }
        }
        output.neutral();
        log::info!("Actuators at neutral");
        Ok(())
    })?;

    let supervisor = Supervisor {
        queues: queues.clone(),
        router: Arc::clone(&router),
        restart_cameras,
        faults,
        shutdown,
    };
    workers.spawn("supervisor", move || {
        supervisor.run(poll);
        Ok(())
    })?;

    log::info!(
        "Vehicle node up: dialing {} (sensor {}, video {}, command {})",
        net.surface_host,
        net.sensor_port,
        net.video_port,
        net.command_port
    );

    Ok(VehicleNode {
        workers,
        queues,
        router,
    })
}

fn publish_sensors(
    mut conn: Connection,
    imu: &mut dyn ImuSource,
    outbox: &PacketQueue,
    shutdown: &Shutdown,
    interval: Duration,
) -> Result<()> {
    while !shutdown.is_requested() {
        // Events stay queued until the surface is reachable
        if conn.try_connect()? {
            match imu.full_state() {
                Ok(snapshot) => send_or_skip(&mut conn, &snapshot.to_packet())?,
                Err(e) => log::warn!("IMU read failed: {}", e),
            }
            for packet in outbox.drain() {
                send_or_skip(&mut conn, &packet)?;
            }
        }
        if shutdown.wait_timeout(interval) {
            break;
        }
    }
    conn.close();
    Ok(())
}

fn publish_video(
    mut conn: Connection,
    mut cameras: Vec<Box<dyn CameraSource>>,
    restart: &AtomicBool,
    outbox: &PacketQueue,
    shutdown: &Shutdown,
    interval: Duration,
) -> Result<()> {
    while !shutdown.is_requested() {
        if restart.swap(false, Ordering::SeqCst) {
            let mut restarted = Vec::new();
            for camera in cameras.iter_mut() {
                match camera.restart() {
                    Ok(()) => restarted.push(camera.device().to_string()),
                    Err(e) => log::warn!("Camera {} restart failed: {}", camera.device(), e),
                }
            }
            outbox.push(Packet::state_change(
                "camerasRestarted",
                json!({ "devices": restarted }),
            ));
        }

        if !conn.try_connect()? {
            continue;
        }
        for camera in cameras.iter_mut() {
            match camera.capture() {
                Ok(Some(frame)) => match frame.to_packet() {
                    Ok(packet) => send_or_skip(&mut conn, &packet)?,
                    Err(e) => log::warn!("Cannot encode frame from {}: {}", frame.device, e),
                },
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Camera {} capture failed: {}", camera.device(), e);
                    if let Err(e) = camera.restart() {
                        log::warn!("Camera {} restart failed: {}", camera.device(), e);
                    }
                }
            }
        }

        if shutdown.wait_timeout(interval) {
            break;
        }
    }
    conn.close();
    Ok(())
}

/// Acts on operator commands and reports node status
struct Supervisor {
    queues: VehicleQueues,
    router: Arc<PacketRouter>,
    restart_cameras: Arc<AtomicBool>,
    faults: Arc<AtomicU64>,
    shutdown: Shutdown,
}

impl Supervisor {
    fn run(&self, poll: Duration) {
        let mut last_status = Instant::now();
        while !self.shutdown.is_requested() {
            if let Some(packet) = self.queues.commands.pop_timeout(poll) {
                self.handle(&packet);
            }
            if last_status.elapsed() >= STATUS_INTERVAL {
                self.queues.outbox.push(self.status());
                last_status = Instant::now();
            }
        }
    }

    fn handle(&self, packet: &Packet) {
        match Command::from_packet(packet) {
            Some(Command::Close) => {
                log::info!("Close received from surface");
                self.shutdown.trigger();
            }
            Some(Command::RestartCamStream) => {
                log::info!("Camera restart requested");
                self.restart_cameras.store(true, Ordering::SeqCst);
            }
            Some(other) => log::debug!("Vehicle ignoring {:?}", other),
            None => log::debug!("Vehicle ignoring event {:?}", packet.event_name()),
        }
    }

    fn status(&self) -> Packet {
        let stats = self.router.stats();
        Packet::log(
            "vehicleStatus",
            json!({
                "dispatched": stats.dispatched,
                "unrouted": stats.unrouted,
                "actuatorFaults": self.faults.load(Ordering::Relaxed),
                "actuatorBacklogDropped": self.queues.actuators.dropped(),
            }),
        )
    }
}
