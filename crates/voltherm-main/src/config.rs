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

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use voltherm_core::{BootstrapSettings, LoopSettings, PinAssignment};
use voltherm_types::{ModeCatalog, OperatingMode, TransitionRule};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub inverter: InverterConfig,

    #[serde(default)]
    pub gpio: GpioConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub control: ControlConfig,

    /// Operating modes replacing the built-in ones
    #[serde(default)]
    pub modes: Option<Vec<OperatingMode>>,

    /// Transition rules replacing the built-in ones
    #[serde(default)]
    pub rules: Option<Vec<TransitionRule>>,
}

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Simulated pins and inverter, nothing touches the hardware
    pub debug_mode: bool,

    /// Log level (debug, info, warn, error), `RUST_LOG` takes precedence
    pub log_level: String,

    /// Control loop period (milliseconds)
    pub poll_interval_ms: u64,

    /// Minimum spacing of stored status samples (seconds)
    pub sample_interval_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            log_level: "info".to_owned(),
            poll_interval_ms: 1000,
            sample_interval_secs: 5,
        }
    }
}

/// Inverter bridge connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    pub bridge_url: String,
    pub request_timeout_secs: u64,
    /// Number stored with every status sample
    pub inverter_number: u8,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:5000".to_owned(),
            request_timeout_secs: 5,
            inverter_number: 1,
        }
    }
}

/// Pin assignment and sysfs location (BCM numbering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// SSR pins of the heater resistor pack, relay #1 first
    pub heater_pins: Vec<u8>,
    pub servo_pwm_pin: u8,
    pub servo_power_pin: u8,
    /// Hardware PWM chip and channel wired to `servo_pwm_pin`
    pub pwm_chip: u8,
    pub pwm_channel: u8,
    pub sysfs_root: PathBuf,
}

impl Default for GpioConfig {
    fn default() -> Self {
        let pins = PinAssignment::default();
        Self {
            heater_pins: pins.heater_relays.to_vec(),
            servo_pwm_pin: pins.servo_pwm,
            servo_power_pin: pins.servo_power,
            pwm_chip: 0,
            pwm_channel: 1,
            sysfs_root: PathBuf::from("/sys/class"),
        }
    }
}

impl GpioConfig {
    pub fn pin_assignment(&self) -> Result<PinAssignment> {
        let heater_relays: [u8; 3] = self
            .heater_pins
            .as_slice()
            .try_into()
            .context("Exactly three heater pins are required")?;
        Ok(PinAssignment {
            heater_relays,
            servo_pwm: self.servo_pwm_pin,
            servo_power: self.servo_power_pin,
        })
    }
}

/// Files and databases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub setpoint_path: PathBuf,
    pub command_queue_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/voltherm.db"),
            setpoint_path: PathBuf::from(voltherm_core::setpoint::DEFAULT_SETPOINT_PATH),
            command_queue_path: PathBuf::from(voltherm_core::commands::DEFAULT_COMMAND_QUEUE_PATH),
        }
    }
}

/// Startup state and smoothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bootstrap_mode: String,
    pub bootstrap_temperature: f32,
    pub bootstrap_commands: Vec<String>,
    /// Weight of the previous average: 4 means `(avg * 4 + v) / 5`
    pub voltage_smoothing_weight: f32,
    /// Hours that latch the night-shift flag
    pub night_hours: Vec<u8>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        let bootstrap = BootstrapSettings::default();
        let settings = LoopSettings::default();
        Self {
            bootstrap_mode: bootstrap.mode,
            bootstrap_temperature: bootstrap.temperature,
            bootstrap_commands: bootstrap.commands,
            voltage_smoothing_weight: settings.smoothing_weight,
            night_hours: settings.night_hours,
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults => f.write_str("defaults with environment overrides"),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Order: explicit path, `VOLTHERM_CONFIG`, `./config.toml`,
    /// `./config.json`, then defaults with `VOLTHERM_*` overrides. The
    /// result is validated before it is returned.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let env_path = std::env::var("VOLTHERM_CONFIG").ok().map(PathBuf::from);
        if let Some(path) = explicit.map(Path::to_path_buf).or(env_path) {
            let config = Self::from_file(&path)?;
            config.validate()?;
            return Ok((config, ConfigSource::File(path)));
        }

        for candidate in ["config.toml", "config.json"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                let config = Self::from_file(&path)?;
                config.validate()?;
                return Ok((config, ConfigSource::File(path)));
            }
        }

        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, ConfigSource::Defaults))
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }

    /// Apply `VOLTHERM_*` overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(debug_mode) = lookup("VOLTHERM_DEBUG_MODE")
            && let Ok(enabled) = debug_mode.parse::<bool>()
        {
            self.system.debug_mode = enabled;
        }

        if let Some(url) = lookup("VOLTHERM_BRIDGE_URL") {
            self.inverter.bridge_url = url;
        }

        if let Some(path) = lookup("VOLTHERM_DB_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }

        if let Some(interval) = lookup("VOLTHERM_POLL_INTERVAL_MS")
            && let Ok(ms) = interval.parse::<u64>()
        {
            self.system.poll_interval_ms = ms;
        }
    }

    /// Built-in catalog with the configured overrides applied
    pub fn catalog(&self) -> ModeCatalog {
        let builtin = ModeCatalog::builtin();
        ModeCatalog::new(
            self.modes.clone().unwrap_or(builtin.modes),
            self.rules.clone().unwrap_or(builtin.rules),
        )
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            poll_interval: Duration::from_millis(self.system.poll_interval_ms),
            sample_interval: Duration::from_secs(self.system.sample_interval_secs),
            inverter_number: self.inverter.inverter_number,
            smoothing_weight: self.control.voltage_smoothing_weight,
            night_hours: self.control.night_hours.clone(),
            initial_mode: self.control.bootstrap_mode.clone(),
        }
    }

    pub fn bootstrap_settings(&self) -> BootstrapSettings {
        BootstrapSettings {
            mode: self.control.bootstrap_mode.clone(),
            temperature: self.control.bootstrap_temperature,
            commands: self.control.bootstrap_commands.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gpio.heater_pins.is_empty() {
            bail!("Configuration must include heater pins");
        }
        if self.gpio.heater_pins.len() != 3 {
            bail!(
                "Exactly three heater pins are required, got {}",
                self.gpio.heater_pins.len()
            );
        }

        let mut pins = HashSet::new();
        for pin in self
            .gpio
            .heater_pins
            .iter()
            .chain([&self.gpio.servo_pwm_pin, &self.gpio.servo_power_pin])
        {
            if !pins.insert(*pin) {
                bail!("GPIO pin {} is assigned more than once", pin);
            }
        }

        if self.system.poll_interval_ms < 100 {
            bail!(
                "poll_interval_ms must be at least 100, got {}",
                self.system.poll_interval_ms
            );
        }

        if self.control.bootstrap_mode.trim().is_empty() {
            bail!("bootstrap_mode must not be empty");
        }

        if !(30.0..=70.0).contains(&self.control.bootstrap_temperature) {
            warn!(
                "bootstrap_temperature {} is outside 30..=70 and will be clamped",
                self.control.bootstrap_temperature
            );
        }

        let catalog = self.catalog();
        for warning in catalog.validate().context("Invalid mode catalog")? {
            warn!("Mode catalog: {}", warning);
        }
        if !catalog.contains_mode(&self.control.bootstrap_mode) {
            bail!(
                "bootstrap_mode '{}' is not defined in the mode catalog",
                self.control.bootstrap_mode
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert!(!config.system.debug_mode);
        assert_eq!(config.system.poll_interval_ms, 1000);
        assert_eq!(config.gpio.heater_pins, vec![17, 27, 22]);
        assert_eq!(config.control.bootstrap_mode, "solar_power");
        assert_eq!(config.catalog(), ModeCatalog::builtin());

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_heater_pin_count() {
        let mut config = AppConfig::default();
        config.gpio.heater_pins.pop();

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("three heater pins")
        );
    }

    #[test]
    fn test_validate_duplicate_pins() {
        let mut config = AppConfig::default();
        config.gpio.servo_power_pin = 17;

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("more than once")
        );
    }

    #[test]
    fn test_loop_starts_in_bootstrap_mode() {
        let mut config = AppConfig::default();
        config.control.bootstrap_mode = "disable_heater".to_owned();

        assert_eq!(config.loop_settings().initial_mode, "disable_heater");
    }

    #[test]
    fn test_validate_poll_interval() {
        let mut config = AppConfig::default();
        config.system.poll_interval_ms = 50;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bootstrap_mode_must_exist() {
        let mut config = AppConfig::default();
        config.control.bootstrap_mode = "boost".to_owned();

        assert!(config.validate().unwrap_err().to_string().contains("boost"));
    }

    #[test]
    fn test_validate_out_of_range_targets_are_clamped_not_refused() {
        let mut config = AppConfig::default();
        config.control.bootstrap_temperature = 75.0;
        let mut modes = config.catalog().modes;
        modes.push(OperatingMode::new("scald", Some(85.0), true, &[]));
        config.modes = Some(modes);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VOLTHERM_DEBUG_MODE", "true"),
            ("VOLTHERM_BRIDGE_URL", "http://inverter.local:5000"),
            ("VOLTHERM_DB_PATH", "/var/lib/voltherm/db.sqlite"),
            ("VOLTHERM_POLL_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_owned()));

        assert!(config.system.debug_mode);
        assert_eq!(config.inverter.bridge_url, "http://inverter.local:5000");
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("/var/lib/voltherm/db.sqlite")
        );
        assert_eq!(config.system.poll_interval_ms, 1000);
    }

    #[test]
    fn test_partial_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voltherm.toml");
        std::fs::write(
            &path,
            r#"
                [system]
                debug_mode = true
                poll_interval_ms = 500

                [gpio]
                heater_pins = [5, 6, 13]
            "#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert!(config.system.debug_mode);
        assert_eq!(config.system.poll_interval_ms, 500);
        assert_eq!(config.system.sample_interval_secs, 5);
        assert_eq!(config.gpio.servo_pwm_pin, 19);
        assert_eq!(config.gpio.pin_assignment().unwrap().heater_relays, [5, 6, 13]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_file_with_catalog_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "control": { "bootstrap_mode": "idle" },
                "modes": [
                    { "name": "idle", "heater": false },
                    { "name": "boost", "target_temperature": 65.0, "heater": true, "commands": ["PCP00"] }
                ],
                "rules": [
                    { "mode": "boost", "hours": [1, 2], "inverter_modes": ["Line"],
                      "battery_min": 0.0, "battery_max": 50.0, "parents": ["idle"] }
                ]
            }"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        let catalog = config.catalog();

        assert_eq!(catalog.modes.len(), 2);
        assert_eq!(catalog.rules.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_catalog_override_is_rejected() {
        let config = AppConfig {
            rules: Some(vec![TransitionRule {
                mode: "missing".to_owned(),
                hours: vec![1],
                inverter_modes: Vec::new(),
                battery_min: 0.0,
                battery_max: 1.0,
                parents: Vec::new(),
                description: String::new(),
            }]),
            ..AppConfig::default()
        };

        assert!(config.validate().is_err());
    }
}
