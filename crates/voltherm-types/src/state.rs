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

use crate::inverter::{ElectricalMode, InverterStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============= Controller State =============

/// Mutable controller state threaded through every decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Name of the last applied operating mode
    pub current_mode: String,

    /// Set the first time the clock enters the night window, never cleared
    pub night_shift: bool,

    /// Exponential moving average of the battery voltage, `None` until the
    /// first valid status sample
    pub smoothed_battery_volts: Option<f32>,
}

impl ControllerState {
    pub fn bootstrap(mode: impl Into<String>) -> Self {
        Self {
            current_mode: mode.into(),
            night_shift: false,
            smoothed_battery_volts: None,
        }
    }

    /// Latch the night-shift flag. Returns true when it was set by this call.
    pub fn mark_night_shift(&mut self) -> bool {
        let first = !self.night_shift;
        self.night_shift = true;
        first
    }

    /// Fold a raw battery reading into the moving average.
    ///
    /// With `weight` = 4 this is `(avg * 4 + volts) / 5`, roughly a 25 s
    /// average at the 5 s sampling cadence.
    pub fn absorb_battery_sample(&mut self, volts: f32, weight: f32) -> f32 {
        let smoothed = match self.smoothed_battery_volts {
            None => volts,
            Some(avg) => (avg * weight + volts) / (weight + 1.0),
        };
        self.smoothed_battery_volts = Some(smoothed);
        smoothed
    }
}

// ============= Transition Ledger Rows =============

/// Mode change as produced by the decision engine, before it is stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransition {
    pub electrical_mode: ElectricalMode,
    pub previous_mode: String,
    pub new_mode: String,
    pub battery_volts: f32,
    pub pv_power_w: f32,
    /// Thermostat target applied with the transition, 0 when unchanged
    pub heater_target_temp: f32,
    pub heater_enabled: bool,
    /// Commands issued on entry, comma separated
    pub commands: String,
    /// Description of the rule that fired
    pub description: String,
}

/// Persisted, immutable transition row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub transition: NewTransition,
}

impl TransitionRecord {
    pub fn stamp(transition: NewTransition, recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            transition,
        }
    }
}

// ============= Status Samples =============

/// Raw status sample stored once per sampling interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    pub sampled_at: DateTime<Utc>,
    pub inverter_number: u8,
    pub status: InverterStatus,
    /// Heater relay #1 read back at sampling time
    pub heater_on: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let mut state = ControllerState::bootstrap("solar_power");
        assert_eq!(state.smoothed_battery_volts, None);

        let avg = state.absorb_battery_sample(52.0, 4.0);
        assert!((avg - 52.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_moving_average_weighting() {
        let mut state = ControllerState::bootstrap("solar_power");
        state.absorb_battery_sample(50.0, 4.0);
        let avg = state.absorb_battery_sample(55.0, 4.0);

        // (50 * 4 + 55) / 5
        assert!((avg - 51.0).abs() < 1e-4);
        assert_eq!(state.smoothed_battery_volts, Some(avg));
    }

    #[test]
    fn test_night_shift_is_sticky() {
        let mut state = ControllerState::bootstrap("solar_power");
        assert!(state.mark_night_shift());
        assert!(!state.mark_night_shift());
        assert!(state.night_shift);
    }
}
