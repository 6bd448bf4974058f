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

use thiserror::Error;

/// Failures that abort a single control cycle.
///
/// None of these are fatal to the process: the control loop logs them and
/// tries again on the next cycle.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("actuator operation '{operation}' failed: {source}")]
    Actuator {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist thermostat setpoint {degrees}: {source}")]
    Setpoint {
        degrees: f32,
        #[source]
        source: anyhow::Error,
    },

    #[error("transition ledger write failed: {0}")]
    Ledger(#[source] anyhow::Error),

    #[error("operating mode '{0}' is not defined in the catalog")]
    UnknownMode(String),
}

impl ControlError {
    pub(crate) fn actuator(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Actuator { operation, source }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
