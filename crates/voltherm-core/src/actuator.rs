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

//! Heater relay bank and thermostat servo of the VLM300 boiler.
//!
//! The heater is a pack of three resistors switched by SSRs; only the
//! first one is used, the other two are always driven low. The thermostat
//! knob is turned by a hobby servo whose supply is switched by a separate
//! power-rail pin. Moving the servo is a fixed choreography of power
//! pulses, PWM start and settle delays, expressed as a [`ServoStep`]
//! script so it can be checked without hardware.

use crate::error::{ControlError, ControlResult};
use crate::ports::{Delay, DigitalIo, SetpointStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lowest thermostat position in °C
pub const THERMOSTAT_MIN_C: f32 = 30.0;
/// Highest thermostat position in °C
pub const THERMOSTAT_MAX_C: f32 = 70.0;
/// Servo PWM frequency
pub const SERVO_PWM_FREQUENCY_HZ: f32 = 50.0;
/// Duty cycle used while the PWM channel is initialised
pub const SERVO_INIT_DUTY_PERCENT: f32 = 2.5;
/// Settle / hold time between servo steps
pub const SERVO_SETTLE: Duration = Duration::from_millis(500);

/// Fixed pin assignment (BCM numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAssignment {
    /// SSR pins of the three heater resistors, relay #1 first
    pub heater_relays: [u8; 3],
    /// Servo control (PWM) pin
    pub servo_pwm: u8,
    /// Servo power-rail pin
    pub servo_power: u8,
}

impl Default for PinAssignment {
    fn default() -> Self {
        Self {
            heater_relays: [17, 27, 22],
            servo_pwm: 19,
            servo_power: 26,
        }
    }
}

// ============= Servo Script =============

/// One step of the thermostat choreography
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoStep {
    /// Switch the servo power rail
    Power(bool),
    /// Wait with the current pin state
    Settle(Duration),
    /// Start the PWM channel
    PwmStart { frequency_hz: f32, duty_percent: f32 },
    /// Change the duty cycle of the running channel
    PwmDuty(f32),
    /// Stop the PWM channel
    PwmStop,
    /// Release the servo pins
    Release,
}

/// Clamp a requested temperature to the mechanical range of the thermostat
pub fn clamp_target(degrees: f32) -> f32 {
    degrees.clamp(THERMOSTAT_MIN_C, THERMOSTAT_MAX_C)
}

/// Servo calibration: 30 °C maps to 10 % duty and every degree above it
/// takes 6/40 % off.
pub fn duty_for_target(degrees: f32) -> f32 {
    let target = clamp_target(degrees);
    10.0 - 6.0 * (target - THERMOSTAT_MIN_C) / 40.0
}

/// Build the full servo script for a (clamped) target temperature.
pub fn thermostat_script(degrees: f32) -> Vec<ServoStep> {
    vec![
        ServoStep::Power(true),
        ServoStep::Settle(SERVO_SETTLE),
        ServoStep::Power(false),
        ServoStep::PwmStart {
            frequency_hz: SERVO_PWM_FREQUENCY_HZ,
            duty_percent: SERVO_INIT_DUTY_PERCENT,
        },
        ServoStep::Settle(SERVO_SETTLE),
        ServoStep::Power(true),
        ServoStep::PwmDuty(duty_for_target(degrees)),
        ServoStep::Settle(SERVO_SETTLE),
        ServoStep::Power(false),
        ServoStep::Settle(SERVO_SETTLE),
        ServoStep::PwmStop,
        ServoStep::Release,
    ]
}

// ============= Sequencer =============

/// Drives the heater relays and the thermostat servo.
///
/// Every operation holds `pin_lock` for its whole duration, so relay writes
/// and the servo choreography never interleave even when called from more
/// than one task.
pub struct ActuatorSequencer {
    io: Arc<dyn DigitalIo>,
    delay: Arc<dyn Delay>,
    setpoint: Arc<dyn SetpointStore>,
    pins: PinAssignment,
    pin_lock: Mutex<()>,
}

impl fmt::Debug for ActuatorSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorSequencer")
            .field("io", &self.io.name())
            .field("pins", &self.pins)
            .finish_non_exhaustive()
    }
}

impl ActuatorSequencer {
    pub fn new(
        io: Arc<dyn DigitalIo>,
        delay: Arc<dyn Delay>,
        setpoint: Arc<dyn SetpointStore>,
        pins: PinAssignment,
    ) -> Self {
        Self {
            io,
            delay,
            setpoint,
            pins,
            pin_lock: Mutex::new(()),
        }
    }

    pub fn pins(&self) -> PinAssignment {
        self.pins
    }

    /// Switch relay #1 and force relays #2 and #3 low.
    pub async fn set_heater(&self, enabled: bool) -> ControlResult<()> {
        let _guard = self.pin_lock.lock().await;
        info!(
            "🔥 {} heater",
            if enabled { "Activating" } else { "Deactivating" }
        );

        let [first, second, third] = self.pins.heater_relays;
        self.io
            .write(first, enabled)
            .map_err(|e| ControlError::actuator("set_heater", e))?;
        for pin in [second, third] {
            self.io
                .write(pin, false)
                .map_err(|e| ControlError::actuator("set_heater", e))?;
        }
        Ok(())
    }

    /// Read back relay #1. Anything but a clean 0/1 counts as off.
    pub async fn is_heater_active(&self) -> bool {
        let _guard = self.pin_lock.lock().await;
        match self.io.read(self.pins.heater_relays[0]) {
            Ok(1) => true,
            Ok(0) => false,
            Ok(raw) => {
                warn!("Unexpected heater relay level {}, treating as off", raw);
                false
            }
            Err(e) => {
                warn!("Failed to read heater relay: {}", e);
                false
            }
        }
    }

    /// Turn the thermostat knob to `degrees` (clamped to 30..=70) and
    /// persist the applied value.
    ///
    /// Returns the clamped target.
    pub async fn set_thermostat(&self, degrees: f32) -> ControlResult<f32> {
        let target = clamp_target(degrees);
        let _guard = self.pin_lock.lock().await;
        info!(
            "🌡️ Setting thermostat to {}°C (duty {:.2}%)",
            target,
            duty_for_target(target)
        );

        for step in thermostat_script(target) {
            if let Err(e) = self.run_step(step).await {
                self.abort_servo();
                return Err(e);
            }
        }

        self.setpoint
            .save(target)
            .map_err(|source| ControlError::Setpoint {
                degrees: target,
                source,
            })?;
        Ok(target)
    }

    /// Last thermostat target persisted by `set_thermostat`
    pub fn last_setpoint(&self) -> Option<f32> {
        match self.setpoint.load() {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to load thermostat setpoint: {}", e);
                None
            }
        }
    }

    /// Leave the servo unpowered and idle after a failed step. Cleanup
    /// failures are only logged so the step error reaches the caller.
    fn abort_servo(&self) {
        let PinAssignment {
            servo_pwm,
            servo_power,
            ..
        } = self.pins;
        warn!("⚠️ Thermostat move failed, de-energizing servo");

        if let Err(e) = self.io.write(servo_power, false) {
            warn!("Failed to switch off servo power: {}", e);
        }
        if let Err(e) = self.io.pwm_stop(servo_pwm) {
            warn!("Failed to stop servo PWM: {}", e);
        }
        if let Err(e) = self.io.release(&[servo_pwm, servo_power]) {
            warn!("Failed to release servo pins: {}", e);
        }
    }

    async fn run_step(&self, step: ServoStep) -> ControlResult<()> {
        debug!("Servo step: {:?}", step);
        let PinAssignment {
            servo_pwm,
            servo_power,
            ..
        } = self.pins;

        let result = match step {
            ServoStep::Power(on) => self.io.write(servo_power, on),
            ServoStep::Settle(duration) => {
                self.delay.sleep(duration).await;
                Ok(())
            }
            ServoStep::PwmStart {
                frequency_hz,
                duty_percent,
            } => self.io.pwm_start(servo_pwm, frequency_hz, duty_percent),
            ServoStep::PwmDuty(duty) => self.io.pwm_set_duty(servo_pwm, duty),
            ServoStep::PwmStop => self.io.pwm_stop(servo_pwm),
            ServoStep::Release => self.io.release(&[servo_pwm, servo_power]),
        };

        result.map_err(|e| ControlError::actuator("set_thermostat", e))
    }
}
