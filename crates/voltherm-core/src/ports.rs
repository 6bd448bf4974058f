// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Voltherm.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Boundaries to the outside world.
//!
//! Business logic only talks to these traits; the binary decides whether
//! they are backed by real hardware (sysfs GPIO, inverter bridge, SQLite)
//! or by the in-memory doubles in [`crate::fakes`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use voltherm_types::{AckResult, ElectricalMode, InverterStatus, StatusSample, TransitionRecord};

// ============= Inverter =============

/// Generic inverter access (status polling and configuration commands)
#[async_trait]
pub trait InverterPort: Send + Sync {
    /// Current electrical mode, `ElectricalMode::Unknown` on any failure
    async fn electrical_mode(&self) -> ElectricalMode;

    /// Full status sample
    async fn full_status(&self) -> Result<InverterStatus>;

    /// Send one configuration command and report whether it was acknowledged
    async fn send_command(&self, code: &str) -> AckResult;

    /// Get port name for logging
    fn name(&self) -> &str;
}

// ============= Digital I/O =============

/// Pin-level hardware access.
///
/// Implementations give no atomicity across several calls; callers that
/// need a consistent multi-pin state must serialise themselves.
pub trait DigitalIo: Send + Sync {
    /// Drive an output pin high or low
    fn write(&self, pin: u8, high: bool) -> Result<()>;

    /// Raw level read back from a pin (0 or 1 on a healthy driver)
    fn read(&self, pin: u8) -> Result<u8>;

    /// Start PWM output on a pin
    fn pwm_start(&self, pin: u8, frequency_hz: f32, duty_percent: f32) -> Result<()>;

    /// Change the duty cycle of a running PWM output
    fn pwm_set_duty(&self, pin: u8, duty_percent: f32) -> Result<()>;

    /// Stop PWM output on a pin
    fn pwm_stop(&self, pin: u8) -> Result<()>;

    /// Return pins to their released (unconfigured) state
    fn release(&self, pins: &[u8]) -> Result<()>;

    /// Get driver name for logging
    fn name(&self) -> &str;
}

// ============= Time =============

/// Sleep capability so hardware choreography can run against a fake clock
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delay backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ============= Persistence =============

/// Sample statistics for a time window, input of the heated-minutes estimate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleDensity {
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub samples: u64,
    pub heater_on_samples: u64,
}

impl SampleDensity {
    /// `(span / samples) * heater_on_samples / 60`, i.e. every heater-on
    /// sample is credited with the average sampling interval.
    #[expect(clippy::cast_precision_loss)]
    pub fn heated_minutes(&self) -> f64 {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return 0.0;
        };
        if self.samples == 0 {
            return 0.0;
        }

        let span_secs = (last - first).num_milliseconds() as f64 / 1000.0;
        span_secs / self.samples as f64 * self.heater_on_samples as f64 / 60.0
    }
}

/// Append-only store for transitions and status samples
pub trait LedgerStore: Send + Sync {
    /// Append one transition row atomically
    fn append_transition(&self, record: &TransitionRecord) -> Result<()>;

    /// Append one status sample row atomically
    fn append_sample(&self, sample: &StatusSample) -> Result<()>;

    /// Sample statistics for `[start, end)`
    fn sample_density(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<SampleDensity>;

    /// Most recent transitions, newest first
    fn recent_transitions(&self, limit: usize) -> Result<Vec<TransitionRecord>>;
}

/// Durable single value: the last commanded thermostat temperature
pub trait SetpointStore: Send + Sync {
    fn load(&self) -> Result<Option<f32>>;

    fn save(&self, degrees: f32) -> Result<()>;
}

/// External queue of pending inverter commands
pub trait CommandQueue: Send + Sync {
    /// Take every pending entry; entries are consumed by this call
    fn drain(&self) -> Result<Vec<String>>;
}
