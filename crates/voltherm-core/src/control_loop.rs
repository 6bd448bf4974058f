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

//! Polling driver.
//!
//! One cycle: read the electrical mode and full status, accept the status
//! as a sample if the previous one is older than the sample interval,
//! smooth the battery voltage, decide, then drain the operator command
//! queue. Decisions only run on cycles with a fresh accepted sample.

use crate::commands::{execute_pending, issue_commands};
use crate::engine::{DecisionInputs, ModeDecisionEngine};
use crate::error::ControlResult;
use crate::ports::{CommandQueue, InverterPort};
use chrono::{DateTime, Local, Timelike, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use voltherm_types::catalog::BOOTSTRAP_MODE;
use voltherm_types::{AckResult, ControllerState, ElectricalMode, NewTransition, StatusSample};

/// Loop cadence and smoothing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    /// Minimum age of the previous sample before a new one is accepted
    pub sample_interval: Duration,
    pub inverter_number: u8,
    /// Weight of the running average, `(avg * w + v) / (w + 1)`
    pub smoothing_weight: f32,
    /// Hours that latch the night-shift flag
    pub night_hours: Vec<u8>,
    /// Mode the loop starts in until bootstrap records one
    pub initial_mode: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            sample_interval: Duration::from_secs(5),
            inverter_number: 1,
            smoothing_weight: 4.0,
            night_hours: vec![22, 23, 0, 1, 2, 3, 4, 5, 6],
            initial_mode: BOOTSTRAP_MODE.to_owned(),
        }
    }
}

/// Startup actuation
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSettings {
    pub mode: String,
    pub temperature: f32,
    pub commands: Vec<String>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            mode: BOOTSTRAP_MODE.to_owned(),
            temperature: 55.0,
            commands: vec!["PCP03".to_owned(), "POP02".to_owned()],
        }
    }
}

/// What happened in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub electrical_mode: ElectricalMode,
    /// A status sample was accepted (and a decision ran)
    pub sampled: bool,
    pub previous_mode: String,
    pub current_mode: String,
    /// Results of operator-queued commands
    pub queued: Vec<AckResult>,
}

impl CycleReport {
    pub fn transitioned(&self) -> bool {
        self.previous_mode != self.current_mode
    }
}

pub struct ControlLoop {
    engine: ModeDecisionEngine,
    inverter: Arc<dyn InverterPort>,
    queue: Arc<dyn CommandQueue>,
    settings: LoopSettings,
    state: ControllerState,
    last_sample_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlLoop")
            .field("engine", &self.engine)
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    pub fn new(
        engine: ModeDecisionEngine,
        inverter: Arc<dyn InverterPort>,
        queue: Arc<dyn CommandQueue>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            state: ControllerState::bootstrap(settings.initial_mode.clone()),
            engine,
            inverter,
            queue,
            settings,
            last_sample_at: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn engine(&self) -> &ModeDecisionEngine {
        &self.engine
    }

    /// Put the installation into a known state and record it as the first
    /// transition of this run.
    pub async fn bootstrap(&mut self, settings: &BootstrapSettings) -> ControlResult<()> {
        info!(
            "🚀 Bootstrapping into {} at {}°C without heater",
            settings.mode, settings.temperature
        );
        let actuators = self.engine.actuators();

        actuators.set_heater(false).await?;
        issue_commands(self.inverter.as_ref(), &settings.commands).await;
        let applied = actuators.set_thermostat(settings.temperature).await?;

        self.engine.ledger().record(NewTransition {
            electrical_mode: self.inverter.electrical_mode().await,
            previous_mode: "start".to_owned(),
            new_mode: settings.mode.clone(),
            battery_volts: 0.0,
            pv_power_w: 0.0,
            heater_target_temp: applied,
            heater_enabled: false,
            commands: settings.commands.join(", "),
            description: "Init".to_owned(),
        })?;

        self.state = ControllerState::bootstrap(settings.mode.clone());
        Ok(())
    }

    /// Execute one polling cycle at wall-clock time `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Local>) -> CycleReport {
        let previous_mode = self.state.current_mode.clone();
        let hour = u8::try_from(now.hour()).unwrap_or_default();
        let electrical_mode = self.inverter.electrical_mode().await;
        debug!(
            "Inverter mode: {} hour: {} mode: {}",
            electrical_mode, hour, self.state.current_mode
        );

        if self.settings.night_hours.contains(&hour) && self.state.mark_night_shift() {
            info!("🌙 Night shift started");
        }

        let sampled = self.sample_and_decide(now.with_timezone(&Utc), hour, &electrical_mode).await;

        let queued = match execute_pending(self.queue.as_ref(), self.inverter.as_ref()).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Failed to drain command queue: {}", e);
                Vec::new()
            }
        };

        CycleReport {
            electrical_mode,
            sampled,
            previous_mode,
            current_mode: self.state.current_mode.clone(),
            queued,
        }
    }

    /// Returns true when a sample was accepted.
    async fn sample_and_decide(
        &mut self,
        now: DateTime<Utc>,
        hour: u8,
        electrical_mode: &ElectricalMode,
    ) -> bool {
        if let Some(last) = self.last_sample_at
            && (now - last).to_std().unwrap_or_default() <= self.settings.sample_interval
        {
            return false;
        }

        let status = match self.inverter.full_status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("No valid status sample: {}", e);
                return false;
            }
        };

        let actuators = self.engine.actuators();
        let heater_on = actuators.is_heater_active().await;
        let sample = StatusSample {
            sampled_at: now,
            inverter_number: self.settings.inverter_number,
            status,
            heater_on,
        };
        if let Err(e) = self.engine.ledger().record_sample(&sample) {
            warn!("Failed to store status sample: {}", e);
        }
        self.last_sample_at = Some(now);

        let smoothed = self
            .state
            .absorb_battery_sample(status.battery_voltage, self.settings.smoothing_weight);

        let heated = self.engine.ledger().heated_minutes(0).unwrap_or_else(|e| {
            warn!("Failed to compute heated minutes: {}", e);
            0.0
        });
        info!(
            "📊 mode: {}, inverter: {}, night: {}, battery: {:.2}V (raw {:.2}V), PV: {}W, heater: {}, heated today: {:.1} min",
            self.state.current_mode,
            electrical_mode,
            self.state.night_shift,
            smoothed,
            status.battery_voltage,
            status.pv_input_power,
            heater_on,
            heated
        );

        let inputs = DecisionInputs {
            electrical_mode: electrical_mode.clone(),
            battery_volts: smoothed,
            pv_power_w: status.pv_input_power,
            hour,
        };
        match self.engine.decide(&self.state, &inputs).await {
            Ok(next) => self.state = next,
            Err(e) => error!("❌ Decision cycle aborted: {}", e),
        }
        true
    }

    /// Poll forever.
    pub async fn run(&mut self) {
        info!(
            "🔁 Control loop started (poll every {:?}, sample every {:?})",
            self.settings.poll_interval, self.settings.sample_interval
        );
        loop {
            let report = self.run_cycle(Local::now()).await;
            if report.transitioned() {
                info!(
                    "✅ Mode changed {} -> {}",
                    report.previous_mode, report.current_mode
                );
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
