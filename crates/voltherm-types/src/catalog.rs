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

//! Static mode and rule catalog.
//!
//! The catalog is the whole control policy of the installation: a set of
//! named operating modes and an ordered list of transition rules that lead
//! into them. It is built once at startup (built-in table or configuration)
//! and never mutated afterwards.

use crate::inverter::ElectricalMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Mode the controller falls back to on startup
pub const BOOTSTRAP_MODE: &str = "solar_power";

// ============= Operating Modes =============

/// Named controller mode: charging source, heater state and thermostat target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingMode {
    /// Unique mode name
    pub name: String,

    /// Thermostat target in °C, `None` leaves the thermostat untouched
    #[serde(default)]
    pub target_temperature: Option<f32>,

    /// Whether the resistive heater is energised in this mode
    pub heater: bool,

    /// Inverter configuration commands issued (in order) when entering the mode
    #[serde(default)]
    pub commands: Vec<String>,
}

impl OperatingMode {
    pub fn new(
        name: &str,
        target_temperature: Option<f32>,
        heater: bool,
        commands: &[&str],
    ) -> Self {
        Self {
            name: name.to_owned(),
            target_temperature,
            heater,
            commands: commands.iter().map(|c| (*c).to_owned()).collect(),
        }
    }
}

// ============= Transition Rules =============

/// Predicate that makes a mode eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Name of the target operating mode
    pub mode: String,

    /// Wall-clock hours (0-23) in which the rule may fire
    pub hours: Vec<u8>,

    /// Electrical modes in which the rule may fire
    pub inverter_modes: Vec<ElectricalMode>,

    /// Lower bound of the battery voltage window (inclusive)
    pub battery_min: f32,

    /// Upper bound of the battery voltage window (inclusive)
    pub battery_max: f32,

    /// Modes the controller must currently be in; empty means any
    #[serde(default)]
    pub parents: Vec<String>,

    /// Human readable reason stored with the transition
    #[serde(default)]
    pub description: String,
}

impl TransitionRule {
    /// Evaluate the rule against one cycle's inputs.
    pub fn is_eligible(
        &self,
        hour: u8,
        electrical_mode: &ElectricalMode,
        battery_volts: f32,
        current_mode: &str,
    ) -> bool {
        self.hours.contains(&hour)
            && self.inverter_modes.contains(electrical_mode)
            && self.battery_min <= battery_volts
            && battery_volts <= self.battery_max
            && self.accepts_parent(current_mode)
    }

    /// Parent gate of the transition graph
    pub fn accepts_parent(&self, current_mode: &str) -> bool {
        self.parents.is_empty() || self.parents.iter().any(|p| p == current_mode)
    }
}

// ============= Validation =============

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("catalog defines no operating modes")]
    NoModes,

    #[error("operating mode '{0}' is defined more than once")]
    DuplicateMode(String),

    #[error("rule #{index} targets undefined mode '{mode}'")]
    UnknownRuleMode { index: usize, mode: String },

    #[error("rule #{index} has an empty voltage window [{min}, {max}]")]
    InvertedVoltageWindow { index: usize, min: f32, max: f32 },
}

/// Non-fatal catalog finding.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogWarning {
    /// Thermostat target the servo clamps to 30..=70
    TargetClamped { mode: String, target: f32 },
    /// Hour value that a 0-23 clock never produces
    UnreachableHour { index: usize, hour: u8 },
    /// Parent name that is not a defined mode
    UnknownParent { index: usize, parent: String },
    /// Rule can never fire
    EmptyRule { index: usize },
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetClamped { mode, target } => {
                write!(f, "mode '{mode}': target {target} is clamped to 30..=70")
            }
            Self::UnreachableHour { index, hour } => {
                write!(f, "rule #{index}: hour {hour} can never match")
            }
            Self::UnknownParent { index, parent } => {
                write!(f, "rule #{index}: parent '{parent}' is not a defined mode")
            }
            Self::EmptyRule { index } => {
                write!(f, "rule #{index}: no hours or inverter modes, rule never fires")
            }
        }
    }
}

// ============= Catalog =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeCatalog {
    pub modes: Vec<OperatingMode>,
    pub rules: Vec<TransitionRule>,
}

impl ModeCatalog {
    pub fn new(modes: Vec<OperatingMode>, rules: Vec<TransitionRule>) -> Self {
        Self { modes, rules }
    }

    /// Look up an operating mode by name
    pub fn mode(&self, name: &str) -> Option<&OperatingMode> {
        self.modes.iter().find(|m| m.name == name)
    }

    pub fn contains_mode(&self, name: &str) -> bool {
        self.mode(name).is_some()
    }

    /// Check catalog invariants.
    ///
    /// Hard errors make the catalog unusable; warnings describe dead
    /// configuration that is tolerated.
    pub fn validate(&self) -> Result<Vec<CatalogWarning>, CatalogError> {
        if self.modes.is_empty() {
            return Err(CatalogError::NoModes);
        }

        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        for mode in &self.modes {
            if !seen.insert(mode.name.as_str()) {
                return Err(CatalogError::DuplicateMode(mode.name.clone()));
            }
            if let Some(target) = mode.target_temperature
                && !(30.0..=70.0).contains(&target)
            {
                warnings.push(CatalogWarning::TargetClamped {
                    mode: mode.name.clone(),
                    target,
                });
            }
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if !seen.contains(rule.mode.as_str()) {
                return Err(CatalogError::UnknownRuleMode {
                    index,
                    mode: rule.mode.clone(),
                });
            }
            if rule.battery_min > rule.battery_max {
                return Err(CatalogError::InvertedVoltageWindow {
                    index,
                    min: rule.battery_min,
                    max: rule.battery_max,
                });
            }
            if rule.hours.is_empty() || rule.inverter_modes.is_empty() {
                warnings.push(CatalogWarning::EmptyRule { index });
            }
            for &hour in rule.hours.iter().filter(|h| **h > 23) {
                warnings.push(CatalogWarning::UnreachableHour { index, hour });
            }
            for parent in rule.parents.iter().filter(|p| !seen.contains(p.as_str())) {
                warnings.push(CatalogWarning::UnknownParent {
                    index,
                    parent: parent.clone(),
                });
            }
        }

        Ok(warnings)
    }

    /// Catalog of the VLM300 installation: night tariff charging with the
    /// heater, solar heating around noon and plain solar charging otherwise.
    pub fn builtin() -> Self {
        use ElectricalMode::{Battery, Line};

        let night: Vec<u8> = vec![22, 23, 0, 1, 2, 3, 4, 5, 6];

        let modes = vec![
            OperatingMode::new("night_charge_heater", Some(45.0), true, &["PCP00", "POP00"]),
            OperatingMode::new("night_heater", None, true, &["PCP03"]),
            OperatingMode::new("solar_init", None, false, &["PCP03", "POP02"]),
            OperatingMode::new("solar_heater", Some(55.0), true, &["PCP03", "POP02"]),
            OperatingMode::new("solar_heater_extra", Some(65.0), true, &["PCP03", "POP02"]),
            OperatingMode::new(BOOTSTRAP_MODE, None, false, &["PCP03", "POP02"]),
            OperatingMode::new("disable_heater", None, false, &[]),
        ];

        let rules = vec![
            rule(
                "night_charge_heater",
                night.clone(),
                &[Line, Battery],
                (0.0, 54.0),
                &[BOOTSTRAP_MODE, "disable_heater"],
                "Activating night charge + heater mode",
            ),
            rule(
                "night_heater",
                night,
                &[Line],
                (52.0, 60.0),
                &["night_charge_heater"],
                "Disabling utility charger",
            ),
            rule(
                "solar_init",
                vec![7],
                &[Line, Battery],
                (46.0, 60.0),
                &["night_charge_heater", "night_heater", BOOTSTRAP_MODE, "disable_heater"],
                "Disabling night charger + heater => solar init mode",
            ),
            rule(
                "solar_heater",
                vec![10, 11, 12, 13],
                &[Battery],
                (52.5, 57.5),
                &["solar_init", BOOTSTRAP_MODE],
                "Activate Solar heater",
            ),
            rule(
                "solar_heater_extra",
                vec![11, 12, 13, 14, 15, 16],
                &[Battery],
                (57.5, 60.0),
                &["solar_heater"],
                "Activate Extra solar heater",
            ),
            rule(
                BOOTSTRAP_MODE,
                vec![13, 14, 15, 16, 17],
                &[Battery],
                (40.0, 51.5),
                &["solar_heater", "solar_heater_extra", "solar_init"],
                "Deactivate Solar heater, solar charge only",
            ),
            rule(
                BOOTSTRAP_MODE,
                vec![18, 19, 20, 21],
                &[Battery],
                (45.0, 60.0),
                &["solar_heater", "solar_heater_extra", "solar_init"],
                "Deactivate Solar heater, solar charge only after 18 always",
            ),
            rule(
                "disable_heater",
                (8..=21).collect(),
                &[Line],
                (40.0, 60.0),
                &[],
                "Deactivate Heater always when in Line mode and heater is on",
            ),
        ];

        Self { modes, rules }
    }
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn rule(
    mode: &str,
    hours: Vec<u8>,
    inverter_modes: &[ElectricalMode],
    (battery_min, battery_max): (f32, f32),
    parents: &[&str],
    description: &str,
) -> TransitionRule {
    TransitionRule {
        mode: mode.to_owned(),
        hours,
        inverter_modes: inverter_modes.to_vec(),
        battery_min,
        battery_max,
        parents: parents.iter().map(|p| (*p).to_owned()).collect(),
        description: description.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = ModeCatalog::builtin();
        let warnings = catalog.validate().unwrap();

        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert_eq!(catalog.modes.len(), 7);
        assert_eq!(catalog.rules.len(), 8);
        assert!(catalog.contains_mode(BOOTSTRAP_MODE));
    }

    #[test]
    fn test_rule_bounds_are_inclusive() {
        let catalog = ModeCatalog::builtin();
        let night = &catalog.rules[0];

        assert!(night.is_eligible(2, &ElectricalMode::Line, 54.0, BOOTSTRAP_MODE));
        assert!(night.is_eligible(2, &ElectricalMode::Line, 0.0, BOOTSTRAP_MODE));
        assert!(!night.is_eligible(2, &ElectricalMode::Line, 54.01, BOOTSTRAP_MODE));
    }

    #[test]
    fn test_rule_parent_gate() {
        let catalog = ModeCatalog::builtin();
        let night = &catalog.rules[0];
        let disable = &catalog.rules[7];

        assert!(!night.is_eligible(2, &ElectricalMode::Line, 50.0, "solar_heater"));
        assert!(disable.accepts_parent("anything"));
    }

    #[test]
    fn test_unknown_rule_mode_is_rejected() {
        let mut catalog = ModeCatalog::builtin();
        catalog.rules[0].mode = "boost".to_owned();

        assert_eq!(
            catalog.validate(),
            Err(CatalogError::UnknownRuleMode {
                index: 0,
                mode: "boost".to_owned()
            })
        );
    }

    #[test]
    fn test_duplicate_mode_is_rejected() {
        let mut catalog = ModeCatalog::builtin();
        catalog.modes.push(OperatingMode::new("solar_init", None, false, &[]));

        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::DuplicateMode(name)) if name == "solar_init"
        ));
    }

    #[test]
    fn test_hour_24_is_reported_as_dead_configuration() {
        let mut catalog = ModeCatalog::builtin();
        catalog.rules[1].hours.push(24);
        catalog.rules[2].parents.push("legacy".to_owned());

        let warnings = catalog.validate().unwrap();
        assert_eq!(
            warnings,
            vec![
                CatalogWarning::UnreachableHour { index: 1, hour: 24 },
                CatalogWarning::UnknownParent {
                    index: 2,
                    parent: "legacy".to_owned()
                },
            ]
        );
    }

    #[test]
    fn test_out_of_range_target_is_a_warning() {
        let mut catalog = ModeCatalog::builtin();
        catalog
            .modes
            .push(OperatingMode::new("scald", Some(85.0), true, &[]));

        assert_eq!(
            catalog.validate(),
            Ok(vec![CatalogWarning::TargetClamped {
                mode: "scald".to_owned(),
                target: 85.0
            }])
        );
    }

    #[test]
    fn test_catalog_from_toml() {
        let toml_str = r#"
            [[modes]]
            name = "boost"
            target_temperature = 60.0
            heater = true
            commands = ["PCP00"]

            [[rules]]
            mode = "boost"
            hours = [1, 2]
            inverter_modes = ["Line"]
            battery_min = 0.0
            battery_max = 50.0
            description = "Boost at night"
        "#;

        let catalog: ModeCatalog = toml::from_str(toml_str).unwrap();
        assert!(catalog.validate().unwrap().is_empty());
        assert!(catalog.rules[0].parents.is_empty());
        assert_eq!(catalog.mode("boost").unwrap().target_temperature, Some(60.0));
    }
}
