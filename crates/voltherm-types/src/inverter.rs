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

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

// ============= Electrical Mode =============

/// Power-source state reported by the inverter (QMOD `device_mode`).
///
/// Only `Line` and `Battery` appear in the built-in rule table, but the
/// inverter reports other states too (standby, fault, power saving, ...).
/// Those are kept verbatim in `Other` so rules loaded from configuration can
/// still match on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElectricalMode {
    /// Utility power drives the load (and may charge the battery)
    Line,
    /// Load runs from the battery / PV
    Battery,
    /// Inverter could not be queried
    #[default]
    Unknown,
    /// Any other state string reported by the device
    Other(String),
}

impl ElectricalMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Line => "Line",
            Self::Battery => "Battery",
            Self::Unknown => "Unknown",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ElectricalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ElectricalMode {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Line" => Self::Line,
            "Battery" => Self::Battery,
            "Unknown" | "" => Self::Unknown,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for ElectricalMode {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ElectricalMode> for String {
    fn from(value: ElectricalMode) -> Self {
        match value {
            ElectricalMode::Other(raw) => raw,
            known @ (ElectricalMode::Line | ElectricalMode::Battery | ElectricalMode::Unknown) => {
                known.as_str().to_owned()
            }
        }
    }
}

impl FromStr for ElectricalMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

// ============= Status Record =============

/// Full status sample of the inverter (QPIGS).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InverterStatus {
    pub ac_input_voltage: f32,
    pub ac_input_frequency: f32,
    pub ac_output_voltage: f32,
    pub ac_output_frequency: f32,
    pub ac_output_apparent_power: f32,
    pub ac_output_active_power: f32,
    pub bus_voltage: f32,
    pub battery_voltage: f32,
    pub battery_charging_current: f32,
    pub inverter_heat_sink_temperature: f32,
    pub pv_input_current_for_battery: f32,
    pub pv_input_voltage: f32,
    pub battery_discharge_current: f32,
    pub pv_input_power: f32,
}

// ============= Command Acknowledgement =============

/// Outcome of a configuration command sent to the inverter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckResult {
    Acknowledged { code: String },
    Failed { code: String, reason: String },
}

impl AckResult {
    pub fn acknowledged(code: impl Into<String>) -> Self {
        Self::Acknowledged { code: code.into() }
    }

    pub fn failed(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Command code this result belongs to
    pub fn code(&self) -> &str {
        match self {
            Self::Acknowledged { code } | Self::Failed { code, .. } => code,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged { .. })
    }
}
