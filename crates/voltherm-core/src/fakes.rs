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

//! In-memory implementations of every port.
//!
//! Used by the tests and by `debug_mode`, where the controller runs without
//! touching real pins or the inverter.

use crate::ports::{
    CommandQueue, Delay, DigitalIo, InverterPort, LedgerStore, SampleDensity, SetpointStore,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use voltherm_types::{AckResult, ElectricalMode, InverterStatus, StatusSample, TransitionRecord};

// ============= Digital I/O =============

/// Pin operation as seen by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum IoOp {
    Write { pin: u8, high: bool },
    PwmStart { pin: u8, frequency_hz: f32, duty_percent: f32 },
    PwmDuty { pin: u8, duty_percent: f32 },
    PwmStop { pin: u8 },
    Release { pins: Vec<u8> },
}

#[derive(Debug, Default)]
struct IoState {
    levels: HashMap<u8, u8>,
    ops: Vec<IoOp>,
    fail_writes: bool,
    fail_reads: bool,
    fail_pwm_duty: bool,
}

/// Pin driver that keeps levels in memory and records every operation
#[derive(Debug, Default)]
pub struct MemoryIo {
    state: Mutex<IoState>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logic level last written to `pin`, `None` if never touched
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.state.lock().levels.get(&pin).map(|raw| *raw != 0)
    }

    /// Make the next reads of `pin` return an arbitrary raw value
    pub fn force_raw_level(&self, pin: u8, raw: u8) {
        self.state.lock().levels.insert(pin, raw);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Fail duty changes only, leaving every other pin operation working
    pub fn fail_pwm_duty(&self, fail: bool) {
        self.state.lock().fail_pwm_duty = fail;
    }

    pub fn ops(&self) -> Vec<IoOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    fn record(&self, op: IoOp) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            bail!("simulated pin failure on {op:?}");
        }
        if let IoOp::Write { pin, high } = op {
            state.levels.insert(pin, u8::from(high));
        }
        state.ops.push(op);
        Ok(())
    }
}

impl DigitalIo for MemoryIo {
    fn write(&self, pin: u8, high: bool) -> Result<()> {
        self.record(IoOp::Write { pin, high })
    }

    fn read(&self, pin: u8) -> Result<u8> {
        let state = self.state.lock();
        if state.fail_reads {
            bail!("simulated read failure on pin {pin}");
        }
        Ok(state.levels.get(&pin).copied().unwrap_or(0))
    }

    fn pwm_start(&self, pin: u8, frequency_hz: f32, duty_percent: f32) -> Result<()> {
        self.record(IoOp::PwmStart {
            pin,
            frequency_hz,
            duty_percent,
        })
    }

    fn pwm_set_duty(&self, pin: u8, duty_percent: f32) -> Result<()> {
        if self.state.lock().fail_pwm_duty {
            bail!("simulated duty failure on pin {pin}");
        }
        self.record(IoOp::PwmDuty { pin, duty_percent })
    }

    fn pwm_stop(&self, pin: u8) -> Result<()> {
        self.record(IoOp::PwmStop { pin })
    }

    fn release(&self, pins: &[u8]) -> Result<()> {
        self.record(IoOp::Release {
            pins: pins.to_vec(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============= Delay =============

/// Delay that returns immediately and remembers what was requested
#[derive(Debug, Default)]
pub struct RecordingDelay {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

// ============= Setpoint =============

#[derive(Debug, Default)]
pub struct MemorySetpointStore {
    value: Mutex<Option<f32>>,
}

impl MemorySetpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Option<f32> {
        *self.value.lock()
    }
}

impl SetpointStore for MemorySetpointStore {
    fn load(&self) -> Result<Option<f32>> {
        Ok(*self.value.lock())
    }

    fn save(&self, degrees: f32) -> Result<()> {
        *self.value.lock() = Some(degrees);
        Ok(())
    }
}

// ============= Ledger =============

#[derive(Debug, Default)]
struct LedgerState {
    transitions: Vec<TransitionRecord>,
    samples: Vec<StatusSample>,
    fail_transitions: bool,
    fail_samples: bool,
}

/// Ledger store backed by two vectors
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.state.lock().transitions.clone()
    }

    pub fn samples(&self) -> Vec<StatusSample> {
        self.state.lock().samples.clone()
    }

    pub fn fail_transitions(&self, fail: bool) {
        self.state.lock().fail_transitions = fail;
    }

    pub fn fail_samples(&self, fail: bool) {
        self.state.lock().fail_samples = fail;
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn append_transition(&self, record: &TransitionRecord) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_transitions {
            bail!("simulated ledger failure");
        }
        state.transitions.push(record.clone());
        Ok(())
    }

    fn append_sample(&self, sample: &StatusSample) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_samples {
            bail!("simulated sample store failure");
        }
        state.samples.push(sample.clone());
        Ok(())
    }

    fn sample_density(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<SampleDensity> {
        let state = self.state.lock();
        let window = state
            .samples
            .iter()
            .filter(|s| s.sampled_at >= start && s.sampled_at < end);

        let mut density = SampleDensity::default();
        for sample in window {
            density.first = Some(density.first.map_or(sample.sampled_at, |f| f.min(sample.sampled_at)));
            density.last = Some(density.last.map_or(sample.sampled_at, |l| l.max(sample.sampled_at)));
            density.samples += 1;
            if sample.heater_on {
                density.heater_on_samples += 1;
            }
        }
        Ok(density)
    }

    fn recent_transitions(&self, limit: usize) -> Result<Vec<TransitionRecord>> {
        let state = self.state.lock();
        Ok(state.transitions.iter().rev().take(limit).cloned().collect())
    }
}

// ============= Inverter =============

#[derive(Debug)]
struct InverterState {
    mode: ElectricalMode,
    status: Option<InverterStatus>,
    rejected: HashSet<String>,
    sent: Vec<String>,
}

/// Inverter whose readings are set by the caller
#[derive(Debug)]
pub struct ScriptedInverter {
    state: Mutex<InverterState>,
}

impl ScriptedInverter {
    pub fn new(mode: ElectricalMode, status: InverterStatus) -> Self {
        Self {
            state: Mutex::new(InverterState {
                mode,
                status: Some(status),
                rejected: HashSet::new(),
                sent: Vec::new(),
            }),
        }
    }

    /// Inverter that answers nothing: mode `Unknown`, status errors
    pub fn unreachable() -> Self {
        let inverter = Self::new(ElectricalMode::Unknown, InverterStatus::default());
        inverter.state.lock().status = None;
        inverter
    }

    pub fn set_mode(&self, mode: ElectricalMode) {
        self.state.lock().mode = mode;
    }

    pub fn set_status(&self, status: InverterStatus) {
        self.state.lock().status = Some(status);
    }

    pub fn set_battery_volts(&self, volts: f32) {
        if let Some(status) = self.state.lock().status.as_mut() {
            status.battery_voltage = volts;
        }
    }

    pub fn go_offline(&self) {
        let mut state = self.state.lock();
        state.status = None;
        state.mode = ElectricalMode::Unknown;
    }

    /// Answer `code` with a failure from now on
    pub fn reject(&self, code: &str) {
        self.state.lock().rejected.insert(code.to_owned());
    }

    /// Every command received so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }
}

#[async_trait]
impl InverterPort for ScriptedInverter {
    async fn electrical_mode(&self) -> ElectricalMode {
        self.state.lock().mode.clone()
    }

    async fn full_status(&self) -> Result<InverterStatus> {
        match self.state.lock().status {
            Some(status) => Ok(status),
            None => bail!("inverter unreachable"),
        }
    }

    async fn send_command(&self, code: &str) -> AckResult {
        let mut state = self.state.lock();
        state.sent.push(code.to_owned());
        if state.rejected.contains(code) {
            AckResult::failed(code, "NAK")
        } else {
            AckResult::acknowledged(code)
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============= Command Queue =============

#[derive(Debug, Default)]
pub struct MemoryCommandQueue {
    pending: Mutex<Vec<String>>,
}

impl MemoryCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: &str) {
        self.pending.lock().push(entry.to_owned());
    }
}

impl CommandQueue for MemoryCommandQueue {
    fn drain(&self) -> Result<Vec<String>> {
        Ok(std::mem::take(&mut *self.pending.lock()))
    }
}
