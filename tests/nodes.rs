//! Surface and vehicle nodes talking over loopback

use jala_io::config::AppConfig;
use jala_io::devices::mock::RecordingActuators;
use jala_io::nodes::surface::{self, SurfaceDevices};
use jala_io::nodes::vehicle::{self, VehicleDevices};
use jala_io::shutdown::Shutdown;
use jala_io::streaming::Packet;
use serde_json::json;
use std::net::TcpListener;
use std::time::{Duration, Instant};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn loopback_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.network.bind_address = "127.0.0.1".into();
    config.network.surface_host = "127.0.0.1".into();
    config.network.sensor_port = free_port();
    config.network.command_port = free_port();
    config.network.video_port = free_port();
    config.network.read_timeout_ms = 50;
    config.network.reconnect_interval_ms = 100;
    config.simulation.random_seed = 42;
    config.simulation.line_miss_rate = 0.0;
    config
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_stabilize_reaches_thrusters_and_close_stops_both_nodes() {
    let config = loopback_config();
    let surface_shutdown = Shutdown::new();
    let vehicle_shutdown = Shutdown::new();

    let actuators = RecordingActuators::new(9);
    let outputs = actuators.values();
    let mut devices = VehicleDevices::simulated(&config);
    devices.actuators = Box::new(actuators);

    let surface = surface::spawn(
        &config,
        SurfaceDevices::simulated(&config),
        surface_shutdown.clone(),
    )
    .unwrap();
    let vehicle = vehicle::spawn(&config, devices, vehicle_shutdown.clone()).unwrap();

    // Strong roll demand; the simulated IMU stays near level
    surface.submit(Packet::state_change("stabilize", json!({"x": 45.0})));
    wait_for("vertical thrusters to move", || {
        outputs.lock()[4..8].iter().any(|v| v.abs() > 0.1)
    });
    assert!(vehicle.router().stats().dispatched > 0);

    surface.submit(Packet::state_change("close", json!(null)));
    wait_for("surface shutdown", || surface_shutdown.is_requested());
    wait_for("vehicle shutdown", || vehicle_shutdown.is_requested());

    assert_eq!(surface.workers.join(), 0);
    assert_eq!(vehicle.workers.join(), 0);
    assert!(outputs.lock().iter().all(|v| *v == 0.0));
}

#[test]
fn test_vehicle_refuses_to_start_with_unwired_channel() {
    let config = loopback_config();
    let mut devices = VehicleDevices::simulated(&config);
    devices.actuators = Box::new(RecordingActuators::new(3));

    let result = vehicle::spawn(&config, devices, Shutdown::new());
    assert!(matches!(result, Err(jala_io::Error::Channel(3))));
}
