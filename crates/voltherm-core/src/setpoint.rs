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

//! Persistence of the last commanded thermostat temperature.
//!
//! The value is a plain decimal in a text file so it can be inspected and
//! edited by hand.

use crate::ports::SetpointStore;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default path of the setpoint file
pub const DEFAULT_SETPOINT_PATH: &str = "./data/current_temp.txt";

#[derive(Debug, Clone)]
pub struct FileSetpointStore {
    path: PathBuf,
}

impl FileSetpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileSetpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_SETPOINT_PATH)
    }
}

impl SetpointStore for FileSetpointStore {
    /// Returns `None` if the file doesn't exist yet.
    fn load(&self) -> Result<Option<f32>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read setpoint from {}", self.path.display()))?;
        let degrees = contents.trim().parse::<f32>().with_context(|| {
            format!(
                "Failed to parse setpoint '{}' from {}",
                contents.trim(),
                self.path.display()
            )
        })?;

        Ok(Some(degrees))
    }

    /// Atomic write (temp file + rename) so a power cut never leaves a
    /// truncated value behind.
    fn save(&self, degrees: f32) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, degrees.to_string())
            .with_context(|| format!("Failed to write temp file {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!("Failed to rename temp file to {}", self.path.display())
        })?;

        debug!("Saved thermostat setpoint {} to {}", degrees, self.path.display());
        Ok(())
    }
}
