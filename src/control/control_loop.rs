//! Fixed-rate control loop and mode state machine
//!
//! # Tick
//!
//! ```text
//! 1. Drain the inbox (never blocks): sensor, camera, commands, gain updates
//! 2. Stop / zero-motor button → user-control, zero frame, nothing else runs
//! 3. Override held            → raw gamepad passthrough, mode untouched
//! 4. Otherwise run the active mode
//! 5. Emit motorData, gripData on grip edges, modeChanged on (mode, override) edges
//! 6. Report the achieved loop rate once per report interval
//! ```
//!
//! # Modes
//!
//! | Mode | Output |
//! |------|--------|
//! | user-control | sticks → mix(x, y, z, 0, 0, yaw) |
//! | stabilize | PID(orientation) → mix(0, 0, 0, roll, pitch, yaw) |
//! | follow-line | PID(angle error), PID(pitch/yaw), PID(stand-off) → mix(dist, 0, 1, roll, pitch, yaw) |
//! | hold-angle | PID(orientation) + stick translation → mix(x, y, z, roll, pitch, yaw) |
//!
//! Each `-init` mode resets its PIDs and moves to the steady mode on the
//! next tick, emitting a zero frame for the init tick itself. Mode requests
//! are only honored from user-control.
//!
//! All PID and mode state is owned by the loop thread.

use crate::config::AppConfig;
use crate::control::mixer::{DriveMixer, MotorFrame};
use crate::control::mode::{Command, ControlMode, GainUpdate, PidAxis};
use crate::control::pid::PidController;
use crate::control::state::{
    CameraFrame, GamepadSnapshot, GamepadState, SensorSnapshot, Vec3, apply_deadzone,
};
use crate::devices::LineDetector;
use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use crate::streaming::packet::{DRIVETRAIN, Packet, Tag};
use crate::streaming::queue::QueueHandle;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Queues the loop reads from and writes to
#[derive(Clone)]
pub struct ControlIo {
    /// Sensor, camera, command and setting packets for the loop
    pub inbox: QueueHandle,
    /// Packets bound for the vehicle (motor frames, grip, forwarded commands)
    pub vehicle: QueueHandle,
    /// Operator-facing events and telemetry
    pub telemetry: QueueHandle,
    pub gamepad: Arc<GamepadState>,
}

/// What one tick produced
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub mode: ControlMode,
    pub override_active: bool,
    pub frame: MotorFrame,
}

pub struct ControlLoop {
    io: ControlIo,
    detector: Box<dyn LineDetector>,
    shutdown: Shutdown,
    mixer: DriveMixer,

    tick_period: Duration,
    report_interval: Duration,
    deadzone: f32,
    control_camera: String,
    standoff_fraction: f32,
    pitch_down_deg: f32,

    mode: ControlMode,
    override_active: bool,
    reported: Option<(ControlMode, bool)>,
    target: Vec3,
    roll: PidController,
    pitch: PidController,
    yaw: PidController,
    distance: PidController,

    sensor: SensorSnapshot,
    camera: Option<CameraFrame>,
    last_grip: i8,

    window_start: Option<Instant>,
    window_ticks: u32,
}

impl ControlLoop {
    pub fn new(
        config: &AppConfig,
        io: ControlIo,
        detector: Box<dyn LineDetector>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let control = &config.control;
        let limit = control.output_limit;
        Ok(Self {
            io,
            detector,
            shutdown,
            mixer: DriveMixer::from_config(&config.motors)?,
            tick_period: control.tick_period(),
            report_interval: Duration::from_millis(control.frequency_report_ms),
            deadzone: config.gamepad.deadzone,
            control_camera: config.cameras.control_camera.clone(),
            standoff_fraction: control.follow_line.standoff_fraction,
            pitch_down_deg: control.follow_line.pitch_setpoint_deg,
            mode: ControlMode::UserControl,
            override_active: false,
            reported: None,
            target: Vec3::default(),
            roll: PidController::new(control.roll, limit),
            pitch: PidController::new(control.pitch, limit),
            yaw: PidController::new(control.yaw, limit),
            distance: PidController::new(control.distance, limit),
            sensor: SensorSnapshot::default(),
            camera: None,
            last_grip: 0,
            window_start: None,
            window_ticks: 0,
        })
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn override_active(&self) -> bool {
        self.override_active
    }

    pub fn pid(&self, axis: PidAxis) -> &PidController {
        match axis {
            PidAxis::Roll => &self.roll,
            PidAxis::Pitch => &self.pitch,
            PidAxis::Yaw => &self.yaw,
            PidAxis::Distance => &self.distance,
        }
    }

    pub fn sensor(&self) -> &SensorSnapshot {
        &self.sensor
    }

    /// Run until shutdown, one tick per period
    pub fn run(&mut self) {
        log::info!(
            "Control loop started ({} ms period)",
            self.tick_period.as_millis()
        );
        while !self.shutdown.is_requested() {
            let started = Instant::now();
            self.tick(started);
            let elapsed = started.elapsed();
            if elapsed < self.tick_period {
                self.shutdown.wait_timeout(self.tick_period - elapsed);
            } else {
                log::debug!("Tick overran: {:?}", elapsed);
            }
        }

        // Leave the thrusters idle
        self.emit_frame(self.mixer.zero());
        log::info!("Control loop stopped");
    }

    /// Execute one tick at time `now`
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let before = self.mode;
        let stop = self.process_inbox();
        let pad = self.io.gamepad.snapshot();

        let frame = if stop || pad.zero_motors {
            if pad.zero_motors {
                self.enter_user_control("zero-motor button");
            }
            self.override_active = false;
            self.mixer.zero()
        } else if pad.override_held {
            self.override_active = true;
            self.passthrough(&pad)
        } else if self.mode.is_init() && self.mode != before {
            // Init work runs on the tick after the request
            self.override_active = false;
            self.mixer.zero()
        } else {
            self.override_active = false;
            self.run_mode(&pad, now)
        };

        self.emit_grip(&pad);
        self.emit_frame(frame.clone());
        self.emit_mode_edge();
        self.track_rate(now);

        TickReport {
            mode: self.mode,
            override_active: self.override_active,
            frame,
        }
    }

    /// Apply every queued packet in order; returns true if a stop was
    /// requested, even if a later command started a new mode
    fn process_inbox(&mut self) -> bool {
        let mut stop = false;
        for packet in self.io.inbox.drain() {
            match packet.tag {
                Tag::Sensor => match SensorSnapshot::from_value(&packet.data) {
                    Ok(snapshot) => self.sensor = snapshot,
                    Err(e) => log::warn!("Bad sensor packet: {}", e),
                },
                Tag::Cam => {
                    if packet.metadata != self.control_camera {
                        continue;
                    }
                    match CameraFrame::from_packet(&packet) {
                        Ok(frame) => self.camera = Some(frame),
                        Err(e) => log::warn!("Bad camera packet: {}", e),
                    }
                }
                Tag::StateChange => {
                    if let Some(command) = Command::from_packet(&packet) {
                        stop |= self.apply_command(command, &packet);
                    }
                }
                Tag::SettingChange => match GainUpdate::from_packet(&packet) {
                    Some(update) => self.retune(update),
                    None => log::warn!("Ignoring setting change: {}", packet.data),
                },
                _ => log::trace!("Control loop ignoring {} packet", packet.tag),
            }
        }
        stop
    }

    fn apply_command(&mut self, command: Command, packet: &Packet) -> bool {
        match command {
            Command::StopMotors => {
                self.enter_user_control("stop-motors");
                return true;
            }
            Command::Close => {
                // The command sender shuts the node down once this is on the wire
                log::info!("Close requested by operator");
                self.enter_user_control("close");
                self.io.vehicle.push(packet.clone());
                return true;
            }
            Command::RestartCamStream => {
                self.io.vehicle.push(packet.clone());
            }
            request if request.is_mode_request() && self.mode != ControlMode::UserControl => {
                log::info!("Ignoring {:?} while in {}", request, self.mode);
            }
            Command::Stabilize(target) => {
                self.target = target;
                self.mode = ControlMode::StabilizeInit;
            }
            Command::FollowLine => {
                self.mode = ControlMode::FollowLineInit;
            }
            Command::HoldAngle(target) => {
                self.target = target;
                self.mode = ControlMode::HoldAngleInit;
            }
        }
        false
    }

    fn enter_user_control(&mut self, cause: &str) {
        if self.mode != ControlMode::UserControl {
            log::info!("Stop ({}): {} → user-control", cause, self.mode);
        }
        self.mode = ControlMode::UserControl;
    }

    fn retune(&mut self, update: GainUpdate) {
        log::info!(
            "Retuning {:?}: kp={} kd={} ki={}",
            update.controller,
            update.kp,
            update.kd,
            update.ki
        );
        let pid = match update.controller {
            PidAxis::Roll => &mut self.roll,
            PidAxis::Pitch => &mut self.pitch,
            PidAxis::Yaw => &mut self.yaw,
            PidAxis::Distance => &mut self.distance,
        };
        pid.retune(update.kp, update.kd, update.ki);
    }

    fn run_mode(&mut self, pad: &GamepadSnapshot, now: Instant) -> MotorFrame {
        match self.mode {
            ControlMode::UserControl => self.passthrough(pad),

            ControlMode::StabilizeInit | ControlMode::HoldAngleInit => {
                self.reset_rotation(self.target);
                self.mode = if self.mode == ControlMode::StabilizeInit {
                    ControlMode::Stabilize
                } else {
                    ControlMode::HoldAngle
                };
                self.mixer.zero()
            }

            ControlMode::Stabilize => {
                let (r, p, y) = self.rotation(now);
                self.mixer.mix(0.0, 0.0, 0.0, r, p, y)
            }

            ControlMode::HoldAngle => {
                let (r, p, y) = self.rotation(now);
                let dz = |v| apply_deadzone(v, self.deadzone);
                self.mixer
                    .mix(dz(pad.left_x), dz(pad.left_y), dz(pad.right_y), r, p, y)
            }

            ControlMode::FollowLineInit => {
                let Some(height) = self.camera.as_ref().map(|f| f.height) else {
                    let reason = Error::Mode(format!(
                        "follow-line needs a frame from {}",
                        self.control_camera
                    ));
                    log::warn!("{}", reason);
                    self.mode = ControlMode::UserControl;
                    self.emit_event(
                        "noCamera",
                        json!({ "camera": self.control_camera, "reason": reason.to_string() }),
                    );
                    return self.mixer.zero();
                };
                self.reset_rotation(Vec3::new(0.0, self.pitch_down_deg, 0.0));
                self.distance.reset();
                self.distance
                    .set_setpoint(self.standoff_fraction * height as f32);
                self.mode = ControlMode::FollowLine;
                self.mixer.zero()
            }

            ControlMode::FollowLine => self.follow_line(now),
        }
    }

    fn follow_line(&mut self, now: Instant) -> MotorFrame {
        let Some(frame) = self.camera.as_ref() else {
            return self.mixer.zero();
        };
        match self.detector.detect(frame) {
            Ok(Some(m)) => {
                let roll = self.roll.update(m.angle_error, now);
                let pitch = self.pitch.update(self.sensor.gyro.y, now);
                let yaw = self.yaw.update(self.sensor.gyro.z, now);
                let dist = self.distance.update(m.distance, now);
                self.mixer.mix(dist, 0.0, 1.0, roll, pitch, yaw)
            }
            Ok(None) => {
                log::debug!("No line detected");
                self.emit_event("failed", json!({ "mode": "follow-line" }));
                self.mixer.zero()
            }
            Err(e) => {
                log::warn!("Line detector failed: {}", e);
                self.emit_event("detectorError", json!({ "error": e.to_string() }));
                self.mixer.zero()
            }
        }
    }

    fn reset_rotation(&mut self, target: Vec3) {
        for (pid, setpoint) in [
            (&mut self.roll, target.x),
            (&mut self.pitch, target.y),
            (&mut self.yaw, target.z),
        ] {
            pid.reset();
            pid.set_setpoint(setpoint);
        }
    }

    fn rotation(&mut self, now: Instant) -> (f32, f32, f32) {
        let gyro = self.sensor.gyro;
        (
            self.roll.update(gyro.x, now),
            self.pitch.update(gyro.y, now),
            self.yaw.update(gyro.z, now),
        )
    }

    fn passthrough(&self, pad: &GamepadSnapshot) -> MotorFrame {
        let dz = |v| apply_deadzone(v, self.deadzone);
        self.mixer.mix(
            dz(pad.left_x),
            dz(pad.left_y),
            dz(pad.right_y),
            0.0,
            0.0,
            dz(pad.right_x),
        )
    }

    fn emit_frame(&self, frame: MotorFrame) {
        let data = json!(frame);
        let packet = Packet::new(Tag::MotorData, data).with_metadata(DRIVETRAIN);
        self.io.telemetry.push(packet.clone());
        self.io.vehicle.push(packet);
    }

    fn emit_grip(&mut self, pad: &GamepadSnapshot) {
        let grip = pad.grip();
        if grip != self.last_grip {
            self.last_grip = grip;
            self.io.vehicle.push(Packet::new(Tag::GripData, json!(grip)));
        }
    }

    fn emit_mode_edge(&mut self) {
        let current = (self.mode, self.override_active);
        if self.reported != Some(current) {
            log::info!(
                "Mode {}{}",
                self.mode,
                if self.override_active { " (override)" } else { "" }
            );
            self.reported = Some(current);
            self.emit_event(
                "modeChanged",
                json!({ "mode": self.mode, "override": self.override_active }),
            );
        }
    }

    fn emit_event(&self, event: &str, data: serde_json::Value) {
        self.io.telemetry.push(Packet::state_change(event, data));
    }

    fn track_rate(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.window_ticks += 1;
        let window = now.saturating_duration_since(start);
        if window >= self.report_interval && !window.is_zero() {
            let hz = (self.window_ticks - 1) as f64 / window.as_secs_f64();
            self.io
                .telemetry
                .push(Packet::log("loopFrequency", json!(hz)));
            log::debug!("Loop frequency {:.1} Hz", hz);
            self.window_start = Some(now);
            self.window_ticks = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::state::{Button, LineMeasurement};
    use crate::streaming::queue::PacketQueue;
    use parking_lot::Mutex;

    /// Detector returning whatever the test last set
    struct ScriptedDetector(Arc<Mutex<Result<Option<LineMeasurement>>>>);

    impl LineDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &CameraFrame) -> Result<Option<LineMeasurement>> {
            match &*self.0.lock() {
                Ok(m) => Ok(*m),
                Err(e) => Err(Error::Other(e.to_string())),
            }
        }
    }

    struct Rig {
        control: ControlLoop,
        io: ControlIo,
        detector: Arc<Mutex<Result<Option<LineMeasurement>>>>,
        shutdown: Shutdown,
        t0: Instant,
        n: u64,
    }

    impl Rig {
        fn new() -> Self {
            let mut config = AppConfig::default();
            config.control.roll = crate::config::PidGains::new(0.05, 0.001, 0.02);
            let io = ControlIo {
                inbox: PacketQueue::fifo("inbox", 64),
                vehicle: PacketQueue::fifo("vehicle", 64),
                telemetry: PacketQueue::fifo("telemetry", 256),
                gamepad: Arc::new(GamepadState::new()),
            };
            let detector = Arc::new(Mutex::new(Ok(None)));
            let shutdown = Shutdown::new();
            let control = ControlLoop::new(
                &config,
                io.clone(),
                Box::new(ScriptedDetector(Arc::clone(&detector))),
                shutdown.clone(),
            )
            .unwrap();
            Self {
                control,
                io,
                detector,
                shutdown,
                t0: Instant::now(),
                n: 0,
            }
        }

        fn tick(&mut self) -> TickReport {
            self.n += 1;
            let now = self.t0 + Duration::from_millis(35 * self.n);
            self.control.tick(now)
        }

        fn send(&self, packet: Packet) {
            self.io.inbox.push(packet);
        }

        fn events(&self, name: &str) -> Vec<Packet> {
            self.io
                .telemetry
                .drain()
                .into_iter()
                .filter(|p| p.tag == Tag::StateChange && p.metadata == name)
                .collect()
        }

        fn camera(&self) {
            let frame = CameraFrame {
                device: "mainCam".into(),
                width: 320,
                height: 240,
                jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            };
            self.send(frame.to_packet().unwrap());
        }

        fn gyro(&self, x: f32, y: f32, z: f32) {
            let snap = SensorSnapshot {
                gyro: Vec3::new(x, y, z),
                ..Default::default()
            };
            self.send(snap.to_packet());
        }
    }

    #[test]
    fn test_starts_in_user_control_with_passthrough() {
        let mut rig = Rig::new();
        rig.io.gamepad.set_axis(crate::control::state::Axis::LeftX, 1.0);
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::UserControl);
        assert_eq!(report.frame.values()[0], 1.0);
        assert_eq!(report.frame.values()[1], -1.0);

        let sent = rig.io.vehicle.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tag, Tag::MotorData);
        assert_eq!(sent[0].metadata, DRIVETRAIN);
        assert_eq!(rig.events("modeChanged").len(), 1);
    }

    #[test]
    fn test_stop_from_any_mode_within_one_tick() {
        let setups: [fn(&mut Rig); 3] = [
            |r| r.send(Packet::state_change("stabilize", json!({"x": 5}))),
            |r| {
                r.camera();
                r.send(Packet::state_change("follow-line", json!(null)));
            },
            |r| r.send(Packet::state_change("hold-angle", json!([1, 2, 3]))),
        ];

        for setup in setups {
            let mut rig = Rig::new();
            *rig.detector.lock() = Ok(Some(LineMeasurement {
                distance: 50.0,
                angle_error: -10.0,
            }));
            setup(&mut rig);
            rig.gyro(20.0, -15.0, 10.0);
            rig.tick();
            rig.tick();
            let steady = rig.tick();
            assert_ne!(steady.mode, ControlMode::UserControl);
            assert!(!steady.frame.is_zero());

            rig.send(Packet::state_change("stop-motors", json!(null)));
            let report = rig.tick();
            assert_eq!(report.mode, ControlMode::UserControl);
            assert!(report.frame.is_zero());
        }
    }

    #[test]
    fn test_request_after_stop_in_same_tick_is_kept() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("hold-angle", json!({"z": 10})));
        rig.tick();
        rig.tick();
        assert_eq!(rig.control.mode(), ControlMode::HoldAngle);

        rig.send(Packet::state_change("stop-motors", json!(null)));
        rig.send(Packet::state_change("stabilize", json!({"x": 4})));
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::StabilizeInit);
        assert!(report.frame.is_zero());

        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::Stabilize);
        assert_eq!(rig.control.pid(PidAxis::Roll).setpoint(), 4.0);

        // A stop arriving after a request still wins
        rig.send(Packet::state_change("stop-motors", json!(null)));
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::UserControl);
        rig.send(Packet::state_change("stabilize", json!({})));
        rig.send(Packet::state_change("stop-motors", json!(null)));
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::UserControl);
        assert!(report.frame.is_zero());
    }

    #[test]
    fn test_zero_motor_button() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("stabilize", json!({})));
        rig.tick();
        rig.io.gamepad.set_button(Button::ZeroMotors, true);
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::UserControl);
        assert!(report.frame.is_zero());
    }

    #[test]
    fn test_init_moves_to_steady_with_reset_pids() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("stabilize", json!({"x": 1, "y": 2, "z": 3})));
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::StabilizeInit);

        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::Stabilize);
        assert!(report.frame.is_zero());
        let roll = rig.control.pid(PidAxis::Roll).state();
        assert_eq!(roll.setpoint, 1.0);
        assert_eq!(roll.integral, 0.0);
        assert_eq!(roll.last_time, None);
        assert_eq!(rig.control.pid(PidAxis::Yaw).setpoint(), 3.0);
    }

    #[test]
    fn test_reset_gives_identical_output_sequences() {
        let run = |rig: &mut Rig| -> Vec<MotorFrame> {
            rig.send(Packet::state_change("stabilize", json!({"x": 0, "y": 0, "z": 0})));
            rig.tick();
            rig.tick();
            let mut frames = Vec::new();
            for (x, y, z) in [(10.0, 0.0, 5.0), (8.0, 1.0, 4.0), (5.0, -2.0, 1.0)] {
                rig.gyro(x, y, z);
                frames.push(rig.tick().frame);
            }
            rig.send(Packet::state_change("stop-motors", json!(null)));
            rig.tick();
            frames
        };

        let mut rig = Rig::new();
        let first = run(&mut rig);
        let second = run(&mut rig);
        assert_eq!(first, second);
        assert!(first.iter().any(|f| !f.is_zero()));
    }

    #[test]
    fn test_follow_line_without_camera_falls_back() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("follow-line", json!(null)));
        rig.tick();
        assert_eq!(rig.control.mode(), ControlMode::FollowLineInit);
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::UserControl);
        assert_eq!(rig.events("noCamera").len(), 1);
    }

    #[test]
    fn test_follow_line_scenario() {
        let mut rig = Rig::new();
        *rig.detector.lock() = Ok(Some(LineMeasurement {
            distance: 50.0,
            angle_error: -10.0,
        }));
        rig.camera();
        rig.gyro(0.0, 0.0, 0.0);
        rig.send(Packet::state_change("follow-line", json!(null)));
        rig.tick();
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::FollowLine);
        assert_eq!(rig.control.pid(PidAxis::Distance).setpoint(), 180.0);

        let first = rig.tick();
        assert!(!first.frame.is_zero());
        let i1 = rig.control.pid(PidAxis::Roll).integral();
        rig.tick();
        let i2 = rig.control.pid(PidAxis::Roll).integral();
        rig.tick();
        let i3 = rig.control.pid(PidAxis::Roll).integral();
        assert_ne!(i1, i2);
        assert_ne!(i2, i3);
    }

    #[test]
    fn test_follow_line_failures_keep_mode() {
        let mut rig = Rig::new();
        rig.camera();
        rig.send(Packet::state_change("follow-line", json!(null)));
        rig.tick();
        rig.tick();
        rig.io.telemetry.drain();

        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::FollowLine);
        assert!(report.frame.is_zero());
        assert_eq!(rig.events("failed").len(), 1);

        *rig.detector.lock() = Err(Error::Other("model crashed".into()));
        let report = rig.tick();
        assert_eq!(report.mode, ControlMode::FollowLine);
        assert_eq!(rig.events("detectorError").len(), 1);
    }

    #[test]
    fn test_mode_requests_ignored_outside_user_control() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("hold-angle", json!({"z": 45})));
        rig.tick();
        rig.tick();
        assert_eq!(rig.control.mode(), ControlMode::HoldAngle);

        rig.send(Packet::state_change("stabilize", json!({})));
        rig.tick();
        assert_eq!(rig.control.mode(), ControlMode::HoldAngle);
    }

    #[test]
    fn test_override_bypasses_mode_and_is_edge_reported() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("stabilize", json!({})));
        rig.tick();
        rig.tick();
        rig.io.telemetry.drain();

        rig.io.gamepad.set_button(Button::Override, true);
        rig.io.gamepad.set_axis(crate::control::state::Axis::RightY, 0.5);
        let a = rig.tick();
        let b = rig.tick();
        assert!(a.override_active && b.override_active);
        assert_eq!(a.mode, ControlMode::Stabilize);
        assert_eq!(a.frame.values()[4], 0.5);
        assert_eq!(rig.events("modeChanged").len(), 1);

        rig.io.gamepad.set_button(Button::Override, false);
        let c = rig.tick();
        assert!(!c.override_active);
        assert_eq!(rig.events("modeChanged").len(), 1);
    }

    #[test]
    fn test_grip_edges() {
        let mut rig = Rig::new();
        rig.io.gamepad.set_button(Button::GripOpen, true);
        rig.tick();
        rig.tick();
        rig.io.gamepad.set_button(Button::GripOpen, false);
        rig.tick();

        let grips: Vec<_> = rig
            .io
            .vehicle
            .drain()
            .into_iter()
            .filter(|p| p.tag == Tag::GripData)
            .map(|p| p.data)
            .collect();
        assert_eq!(grips, vec![json!(1), json!(0)]);
    }

    #[test]
    fn test_setting_change_retunes() {
        let mut rig = Rig::new();
        rig.send(Packet::new(
            Tag::SettingChange,
            json!({"controller": "distance", "kp": 1.5, "kd": 0.0, "ki": 0.25}),
        ));
        rig.tick();
        let gains = rig.control.pid(PidAxis::Distance).gains();
        assert_eq!(gains.kp, 1.5);
        assert_eq!(gains.ki, 0.25);
    }

    #[test]
    fn test_close_forwards_and_stops() {
        let mut rig = Rig::new();
        rig.send(Packet::state_change("hold-angle", json!({})));
        rig.tick();
        rig.tick();
        rig.io.vehicle.drain();

        rig.send(Packet::state_change("restartCamStream", json!(null)));
        rig.send(Packet::new(Tag::StateChange, json!("close")));
        let report = rig.tick();
        assert!(report.frame.is_zero());
        assert_eq!(report.mode, ControlMode::UserControl);

        let forwarded: Vec<_> = rig
            .io
            .vehicle
            .drain()
            .into_iter()
            .filter_map(|p| p.event_name().map(str::to_string))
            .collect();
        assert_eq!(forwarded, vec!["restartCamStream", "close"]);
    }

    #[test]
    fn test_loop_frequency_reported() {
        let mut rig = Rig::new();
        for _ in 0..40 {
            rig.tick();
        }
        let reports: Vec<_> = rig
            .io
            .telemetry
            .drain()
            .into_iter()
            .filter(|p| p.tag == Tag::Log && p.metadata == "loopFrequency")
            .collect();
        assert_eq!(reports.len(), 1);
        let hz = reports[0].data.as_f64().unwrap();
        assert!((hz - 1000.0 / 35.0).abs() < 0.5, "{}", hz);
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let mut rig = Rig::new();
        let trigger = rig.shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.trigger();
        });
        rig.control.run();
        handle.join().unwrap();
        let last = rig.io.vehicle.drain().pop().unwrap();
        assert_eq!(last.tag, Tag::MotorData);
        assert_eq!(last.data, json!([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    }
}
