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

pub mod actuator;
pub mod commands;
pub mod control_loop;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod ledger;
pub mod ports;
pub mod setpoint;
pub mod storage;

// Re-export main types for convenience
pub use actuator::{ActuatorSequencer, PinAssignment, ServoStep};
pub use commands::{FileCommandQueue, execute_pending, issue_commands};
pub use control_loop::{BootstrapSettings, ControlLoop, CycleReport, LoopSettings};
pub use engine::{Decision, DecisionInputs, ModeDecisionEngine};
pub use error::{ControlError, ControlResult};
pub use ledger::TransitionLedger;
pub use ports::{
    CommandQueue, Delay, DigitalIo, InverterPort, LedgerStore, SampleDensity, SetpointStore,
    TokioDelay,
};
pub use setpoint::FileSetpointStore;
pub use storage::SqliteLedgerStore;
