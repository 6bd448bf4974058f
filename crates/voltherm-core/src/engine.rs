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

//! Mode decision engine.
//!
//! Every rule of the catalog is evaluated against the cycle inputs. A
//! transition happens only when the eligible rules agree on exactly one
//! target mode and that mode is not already active; ties between distinct
//! modes are left alone rather than broken by catalog order.

use crate::actuator::ActuatorSequencer;
use crate::commands::issue_commands;
use crate::error::{ControlError, ControlResult};
use crate::ledger::TransitionLedger;
use crate::ports::InverterPort;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use voltherm_types::{
    CatalogError, ControllerState, ElectricalMode, ModeCatalog, NewTransition, OperatingMode,
};

/// Inputs of one decision
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionInputs {
    pub electrical_mode: ElectricalMode,
    /// Smoothed battery voltage
    pub battery_volts: f32,
    pub pv_power_w: f32,
    /// Local wall-clock hour, 0-23
    pub hour: u8,
}

/// Outcome of evaluating the rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No rule is eligible
    NoMatch,
    /// The only candidate is the current mode
    AlreadyActive { mode: String },
    /// Eligible rules disagree; candidates in first-match order
    Ambiguous { candidates: Vec<String> },
    /// Switch to `mode`; `rule_index` is the first eligible rule
    Transition { mode: String, rule_index: usize },
}

pub struct ModeDecisionEngine {
    catalog: ModeCatalog,
    actuators: Arc<ActuatorSequencer>,
    ledger: TransitionLedger,
    inverter: Arc<dyn InverterPort>,
}

impl fmt::Debug for ModeDecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeDecisionEngine")
            .field("modes", &self.catalog.modes.len())
            .field("rules", &self.catalog.rules.len())
            .field("inverter", &self.inverter.name())
            .finish_non_exhaustive()
    }
}

impl ModeDecisionEngine {
    /// Build the engine over a validated catalog. Catalog warnings are
    /// logged and otherwise ignored.
    pub fn new(
        catalog: ModeCatalog,
        actuators: Arc<ActuatorSequencer>,
        ledger: TransitionLedger,
        inverter: Arc<dyn InverterPort>,
    ) -> Result<Self, CatalogError> {
        for warning in catalog.validate()? {
            warn!("⚠️ Catalog: {}", warning);
        }

        Ok(Self {
            catalog,
            actuators,
            ledger,
            inverter,
        })
    }

    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    pub fn actuators(&self) -> &Arc<ActuatorSequencer> {
        &self.actuators
    }

    pub fn ledger(&self) -> &TransitionLedger {
        &self.ledger
    }

    /// Evaluate the rule table without touching anything.
    pub fn evaluate(&self, current_mode: &str, inputs: &DecisionInputs) -> Decision {
        let mut first_eligible = None;
        let mut candidates: Vec<String> = Vec::new();

        for (index, rule) in self.catalog.rules.iter().enumerate() {
            let eligible = rule.is_eligible(
                inputs.hour,
                &inputs.electrical_mode,
                inputs.battery_volts,
                current_mode,
            );
            debug!(
                "Rule #{} -> {}: hour={} mode={} volts={:.2} parent={} => {}",
                index,
                rule.mode,
                rule.hours.contains(&inputs.hour),
                rule.inverter_modes.contains(&inputs.electrical_mode),
                inputs.battery_volts,
                rule.accepts_parent(current_mode),
                eligible
            );

            if !eligible {
                continue;
            }
            first_eligible.get_or_insert(index);
            if !candidates.contains(&rule.mode) {
                candidates.push(rule.mode.clone());
            }
        }

        match (candidates.len(), first_eligible) {
            (1, Some(rule_index)) => {
                let mode = candidates.remove(0);
                if mode == current_mode {
                    Decision::AlreadyActive { mode }
                } else {
                    Decision::Transition { mode, rule_index }
                }
            }
            (0, _) | (_, None) => Decision::NoMatch,
            _ => Decision::Ambiguous { candidates },
        }
    }

    /// Run one decision and apply the resulting transition, if any.
    ///
    /// Returns the state to carry into the next cycle. On error the state
    /// is left unchanged so the transition is attempted again later.
    pub async fn decide(
        &self,
        state: &ControllerState,
        inputs: &DecisionInputs,
    ) -> ControlResult<ControllerState> {
        match self.evaluate(&state.current_mode, inputs) {
            Decision::NoMatch => {
                debug!("No rule matched in mode {}", state.current_mode);
                Ok(state.clone())
            }
            Decision::AlreadyActive { mode } => {
                debug!("Mode {} already active", mode);
                Ok(state.clone())
            }
            Decision::Ambiguous { candidates } => {
                warn!(
                    "⚠️ Ambiguous rule match in mode {}: candidates [{}], keeping current mode",
                    state.current_mode,
                    candidates.join(", ")
                );
                Ok(state.clone())
            }
            Decision::Transition { mode, rule_index } => {
                let target = self
                    .catalog
                    .mode(&mode)
                    .ok_or_else(|| ControlError::UnknownMode(mode.clone()))?;
                let description = self
                    .catalog
                    .rules
                    .get(rule_index)
                    .map(|rule| format!("rule #{rule_index}: {}", rule.description))
                    .unwrap_or_default();

                info!("🔄 Switching {} -> {} ({})", state.current_mode, mode, description);
                self.apply(state, inputs, target, description).await
            }
        }
    }

    async fn apply(
        &self,
        state: &ControllerState,
        inputs: &DecisionInputs,
        target: &OperatingMode,
        description: String,
    ) -> ControlResult<ControllerState> {
        let applied_temp = match target.target_temperature {
            Some(degrees) => self.actuators.set_thermostat(degrees).await?,
            None => 0.0,
        };

        self.actuators.set_heater(target.heater).await?;

        let results = issue_commands(self.inverter.as_ref(), &target.commands).await;
        let failed = results.iter().filter(|r| !r.is_acknowledged()).count();
        if failed > 0 {
            warn!(
                "⚠️ {} of {} command(s) for {} were not acknowledged",
                failed,
                results.len(),
                target.name
            );
        }

        self.ledger.record(NewTransition {
            electrical_mode: inputs.electrical_mode.clone(),
            previous_mode: state.current_mode.clone(),
            new_mode: target.name.clone(),
            battery_volts: inputs.battery_volts,
            pv_power_w: inputs.pv_power_w,
            heater_target_temp: applied_temp,
            heater_enabled: target.heater,
            commands: target.commands.join(", "),
            description,
        })?;

        Ok(ControllerState {
            current_mode: target.name.clone(),
            ..state.clone()
        })
    }
}
