//! Discrete PID controller
//!
//! `output = kp·e + ki·∫e dt + kd·de/dt` with `e = setpoint - measurement`.
//!
//! Time is supplied by the caller so runs are reproducible. The first update
//! after construction or [`PidController::reset`] has no history, so it
//! contributes neither integral nor derivative. The output is clamped to
//! `±output_limit`, and the accumulator is held so `ki·∫e` alone never
//! exceeds that limit.

use crate::config::PidGains;
use std::time::Instant;

/// Snapshot of a controller's internal state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidState {
    pub kp: f32,
    pub kd: f32,
    pub ki: f32,
    pub setpoint: f32,
    pub integral: f32,
    pub last_error: Option<f32>,
    pub last_time: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    output_limit: f32,
    setpoint: f32,
    integral: f32,
    last_error: Option<f32>,
    last_time: Option<Instant>,
}

impl PidController {
    pub fn new(gains: PidGains, output_limit: f32) -> Self {
        Self {
            gains,
            output_limit: output_limit.abs(),
            setpoint: 0.0,
            integral: 0.0,
            last_error: None,
            last_time: None,
        }
    }

    /// Discard accumulated history
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
        self.last_time = None;
    }

    /// Change gains; history is kept
    pub fn retune(&mut self, kp: f32, kd: f32, ki: f32) {
        self.gains = PidGains::new(kp, kd, ki);
        self.clamp_integral();
    }

    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn state(&self) -> PidState {
        PidState {
            kp: self.gains.kp,
            kd: self.gains.kd,
            ki: self.gains.ki,
            setpoint: self.setpoint,
            integral: self.integral,
            last_error: self.last_error,
            last_time: self.last_time,
        }
    }

    /// Feed one measurement taken at `now`; returns the clamped output
    pub fn update(&mut self, measurement: f32, now: Instant) -> f32 {
        let error = self.setpoint - measurement;
        let dt = self
            .last_time
            .map(|t| now.saturating_duration_since(t).as_secs_f32())
            .unwrap_or(0.0);

        let mut derivative = 0.0;
        if dt > 0.0 {
            self.integral += error * dt;
            self.clamp_integral();
            if let Some(last) = self.last_error {
                derivative = (error - last) / dt;
            }
        }
        self.last_error = Some(error);
        self.last_time = Some(now);

        let PidGains { kp, kd, ki } = self.gains;
        let output = kp * error + ki * self.integral + kd * derivative;
        output.clamp(-self.output_limit, self.output_limit)
    }

    fn clamp_integral(&mut self) {
        if self.gains.ki != 0.0 {
            let bound = self.output_limit / self.gains.ki.abs();
            self.integral = self.integral.clamp(-bound, bound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ticks(start: Instant, n: usize) -> Vec<Instant> {
        (0..n)
            .map(|i| start + Duration::from_millis(35 * i as u64))
            .collect()
    }

    #[test]
    fn test_first_update_is_proportional_only() {
        let mut pid = PidController::new(PidGains::new(0.1, 1.0, 1.0), 10.0);
        pid.set_setpoint(5.0);
        let out = pid.update(3.0, Instant::now());
        assert!((out - 0.2).abs() < 1e-6);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_integral_accumulates() {
        let mut pid = PidController::new(PidGains::new(0.0, 0.0, 1.0), 10.0);
        pid.set_setpoint(1.0);
        let t = ticks(Instant::now(), 3);
        pid.update(0.0, t[0]);
        pid.update(0.0, t[1]);
        let i1 = pid.integral();
        pid.update(0.0, t[2]);
        let i2 = pid.integral();
        assert!((i1 - 0.035).abs() < 1e-5);
        assert!(i2 > i1);
    }

    #[test]
    fn test_derivative_sign() {
        let mut pid = PidController::new(PidGains::new(0.0, 1.0, 0.0), 100.0);
        let t = ticks(Instant::now(), 2);
        pid.update(0.0, t[0]);
        // Measurement rising → error falling → negative derivative
        let out = pid.update(1.0, t[1]);
        assert!(out < 0.0);
    }

    #[test]
    fn test_output_and_integral_clamped() {
        let mut pid = PidController::new(PidGains::new(10.0, 0.0, 2.0), 1.0);
        pid.set_setpoint(100.0);
        let start = Instant::now();
        for i in 0..200 {
            let out = pid.update(0.0, start + Duration::from_millis(100 * i));
            assert!((-1.0..=1.0).contains(&out));
        }
        assert!(pid.integral() <= 0.5 + 1e-6);
    }

    #[test]
    fn test_reset_reproduces_sequence() {
        let mut pid = PidController::new(PidGains::new(0.3, 0.05, 0.2), 1.0);
        pid.set_setpoint(0.0);
        let errors = [-10.0, -8.0, -8.5, -3.0, 1.0, 0.5];

        let start = Instant::now();
        let first: Vec<f32> = errors
            .iter()
            .zip(ticks(start, errors.len()))
            .map(|(m, t)| pid.update(*m, t))
            .collect();

        pid.reset();
        let later = start + Duration::from_secs(60);
        let second: Vec<f32> = errors
            .iter()
            .zip(ticks(later, errors.len()))
            .map(|(m, t)| pid.update(*m, t))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_retune_keeps_history() {
        let mut pid = PidController::new(PidGains::new(1.0, 0.0, 1.0), 10.0);
        pid.set_setpoint(1.0);
        let t = ticks(Instant::now(), 2);
        pid.update(0.0, t[0]);
        pid.update(0.0, t[1]);
        let before = pid.integral();
        pid.retune(2.0, 0.1, 0.5);
        assert_eq!(pid.gains(), PidGains::new(2.0, 0.1, 0.5));
        assert_eq!(pid.integral(), before);
        assert_eq!(pid.state().kd, 0.1);
    }
}
