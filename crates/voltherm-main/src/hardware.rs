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

//! Linux sysfs driver for the relay and servo pins.
//!
//! GPIOs live under `<root>/gpio/gpioN`, the servo PWM under
//! `<root>/pwm/pwmchipC/pwmK`. Pins are exported lazily on first use.

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use voltherm_core::DigitalIo;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug, Default)]
struct SysfsState {
    outputs: HashSet<u8>,
    pwm_period_ns: Option<u64>,
}

#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    pwm_pin: u8,
    pwm_chip: u8,
    pwm_channel: u8,
    state: Mutex<SysfsState>,
}

impl SysfsGpio {
    /// `pwm_pin` is the GPIO routed to `pwmchip{pwm_chip}/pwm{pwm_channel}`
    pub fn new(root: impl Into<PathBuf>, pwm_pin: u8, pwm_chip: u8, pwm_channel: u8) -> Self {
        Self {
            root: root.into(),
            pwm_pin,
            pwm_chip,
            pwm_channel,
            state: Mutex::new(SysfsState::default()),
        }
    }

    fn gpio_dir(&self, pin: u8) -> PathBuf {
        self.root.join("gpio").join(format!("gpio{pin}"))
    }

    fn chip_dir(&self) -> PathBuf {
        self.root.join("pwm").join(format!("pwmchip{}", self.pwm_chip))
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip_dir().join(format!("pwm{}", self.pwm_channel))
    }

    fn ensure_output(&self, pin: u8) -> Result<()> {
        let mut state = self.state.lock();
        if state.outputs.contains(&pin) {
            return Ok(());
        }

        if !self.gpio_dir(pin).exists() {
            write_attr(&self.root.join("gpio").join("export"), &pin.to_string())?;
        }
        write_attr(&self.gpio_dir(pin).join("direction"), "out")?;
        state.outputs.insert(pin);
        debug!("Exported GPIO {} as output", pin);
        Ok(())
    }

    fn check_pwm_pin(&self, pin: u8) -> Result<()> {
        if pin != self.pwm_pin {
            bail!(
                "GPIO {} is not routed to a PWM channel (expected {})",
                pin,
                self.pwm_pin
            );
        }
        Ok(())
    }

    fn write_duty(&self, period_ns: u64, duty_percent: f32) -> Result<()> {
        write_attr(
            &self.channel_dir().join("duty_cycle"),
            &duty_ns(period_ns, duty_percent).to_string(),
        )
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).with_context(|| format!("Failed to write '{}' to {}", value, path.display()))
}

#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn period_ns(frequency_hz: f32) -> u64 {
    (NANOS_PER_SEC / f64::from(frequency_hz)).round() as u64
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn duty_ns(period_ns: u64, duty_percent: f32) -> u64 {
    (period_ns as f64 * f64::from(duty_percent.clamp(0.0, 100.0)) / 100.0).round() as u64
}

impl DigitalIo for SysfsGpio {
    fn write(&self, pin: u8, high: bool) -> Result<()> {
        self.ensure_output(pin)?;
        write_attr(&self.gpio_dir(pin).join("value"), if high { "1" } else { "0" })
    }

    fn read(&self, pin: u8) -> Result<u8> {
        let path = self.gpio_dir(pin).join("value");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        raw.trim()
            .parse::<u8>()
            .with_context(|| format!("Unexpected value '{}' in {}", raw.trim(), path.display()))
    }

    fn pwm_start(&self, pin: u8, frequency_hz: f32, duty_percent: f32) -> Result<()> {
        self.check_pwm_pin(pin)?;
        if frequency_hz <= 0.0 {
            bail!("PWM frequency must be positive, got {}", frequency_hz);
        }

        if !self.channel_dir().exists() {
            write_attr(&self.chip_dir().join("export"), &self.pwm_channel.to_string())?;
        }

        let period = period_ns(frequency_hz);
        // duty_cycle must never exceed period, so shrink it before changing the period
        write_attr(&self.channel_dir().join("duty_cycle"), "0")?;
        write_attr(&self.channel_dir().join("period"), &period.to_string())?;
        self.write_duty(period, duty_percent)?;
        write_attr(&self.channel_dir().join("enable"), "1")?;

        self.state.lock().pwm_period_ns = Some(period);
        debug!("PWM on GPIO {} started at {} Hz, {}%", pin, frequency_hz, duty_percent);
        Ok(())
    }

    fn pwm_set_duty(&self, pin: u8, duty_percent: f32) -> Result<()> {
        self.check_pwm_pin(pin)?;
        let period = self
            .state
            .lock()
            .pwm_period_ns
            .context("PWM channel is not running")?;
        self.write_duty(period, duty_percent)
    }

    fn pwm_stop(&self, pin: u8) -> Result<()> {
        self.check_pwm_pin(pin)?;
        if self.channel_dir().exists() {
            write_attr(&self.channel_dir().join("enable"), "0")?;
        }
        self.state.lock().pwm_period_ns = None;
        Ok(())
    }

    fn release(&self, pins: &[u8]) -> Result<()> {
        for &pin in pins {
            if pin == self.pwm_pin && self.channel_dir().exists() {
                write_attr(&self.chip_dir().join("unexport"), &self.pwm_channel.to_string())?;
            }
            if self.gpio_dir(pin).exists() {
                write_attr(&self.root.join("gpio").join("unexport"), &pin.to_string())?;
            }
            self.state.lock().outputs.remove(&pin);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sysfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Fake sysfs tree where the pins are already exported
    fn fake_sysfs(root: &Path, pins: &[u8]) {
        fs::create_dir_all(root.join("gpio")).unwrap();
        for pin in pins {
            fs::create_dir_all(root.join("gpio").join(format!("gpio{pin}"))).unwrap();
        }
        fs::create_dir_all(root.join("pwm").join("pwmchip0").join("pwm1")).unwrap();
    }

    fn attr(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        fake_sysfs(dir.path(), &[17]);
        let gpio = SysfsGpio::new(dir.path(), 19, 0, 1);

        gpio.write(17, true).unwrap();

        assert_eq!(attr(dir.path().join("gpio/gpio17/direction")), "out");
        assert_eq!(attr(dir.path().join("gpio/gpio17/value")), "1");
        assert_eq!(gpio.read(17).unwrap(), 1);
    }

    #[test]
    fn test_unexported_pin_is_exported() {
        let dir = tempdir().unwrap();
        fake_sysfs(dir.path(), &[]);
        let gpio = SysfsGpio::new(dir.path(), 19, 0, 1);

        // The kernel would create gpio27/ on export; the fake tree cannot
        assert!(gpio.write(27, false).is_err());
        assert_eq!(attr(dir.path().join("gpio/export")), "27");
    }

    #[test]
    fn test_pwm_duty_in_nanoseconds() {
        let dir = tempdir().unwrap();
        fake_sysfs(dir.path(), &[]);
        let gpio = SysfsGpio::new(dir.path(), 19, 0, 1);
        let channel = dir.path().join("pwm/pwmchip0/pwm1");

        gpio.pwm_start(19, 50.0, 2.5).unwrap();
        assert_eq!(attr(channel.join("period")), "20000000");
        assert_eq!(attr(channel.join("duty_cycle")), "500000");
        assert_eq!(attr(channel.join("enable")), "1");

        gpio.pwm_set_duty(19, 10.0).unwrap();
        assert_eq!(attr(channel.join("duty_cycle")), "2000000");

        gpio.pwm_stop(19).unwrap();
        assert_eq!(attr(channel.join("enable")), "0");
        assert!(gpio.pwm_set_duty(19, 5.0).is_err());
    }

    #[test]
    fn test_pwm_on_wrong_pin_is_rejected() {
        let dir = tempdir().unwrap();
        fake_sysfs(dir.path(), &[]);
        let gpio = SysfsGpio::new(dir.path(), 19, 0, 1);

        assert!(gpio.pwm_start(26, 50.0, 2.5).is_err());
    }

    #[test]
    fn test_release_unexports() {
        let dir = tempdir().unwrap();
        fake_sysfs(dir.path(), &[19, 26]);
        let gpio = SysfsGpio::new(dir.path(), 19, 0, 1);

        gpio.release(&[19, 26]).unwrap();

        assert_eq!(attr(dir.path().join("pwm/pwmchip0/unexport")), "1");
        assert_eq!(attr(dir.path().join("gpio/unexport")), "26");
    }
}
