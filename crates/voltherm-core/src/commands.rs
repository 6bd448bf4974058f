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

//! Inverter command dispatch and the operator command queue.
//!
//! Operators can drop raw inverter commands into a text file, one per
//! line. The control loop drains the file once per cycle.

use crate::ports::{CommandQueue, InverterPort};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use voltherm_types::AckResult;

/// Default path of the operator command queue
pub const DEFAULT_COMMAND_QUEUE_PATH: &str = "./data/commands.txt";

/// Entries this short are leftovers of blank lines or stray characters
const MIN_COMMAND_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct FileCommandQueue {
    path: PathBuf,
}

impl FileCommandQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileCommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_QUEUE_PATH)
    }
}

impl CommandQueue for FileCommandQueue {
    /// Read and delete the queue file. A missing file is an empty queue.
    fn drain(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read command queue {}", self.path.display()))?;
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove command queue {}", self.path.display()))?;

        Ok(contents.split('\n').map(str::to_owned).collect())
    }
}

/// Send `codes` in order, logging each outcome. A rejected command does not
/// stop the remaining ones.
pub async fn issue_commands(inverter: &dyn InverterPort, codes: &[String]) -> Vec<AckResult> {
    let mut results = Vec::with_capacity(codes.len());
    for code in codes {
        let result = inverter.send_command(code).await;
        match &result {
            AckResult::Acknowledged { code } => info!("✅ Command {} acknowledged", code),
            AckResult::Failed { code, reason } => {
                warn!("❌ Command {} failed: {}", code, reason);
            }
        }
        results.push(result);
    }
    results
}

/// Drain the queue and execute every usable entry.
pub async fn execute_pending(
    queue: &dyn CommandQueue,
    inverter: &dyn InverterPort,
) -> Result<Vec<AckResult>> {
    let entries = queue.drain()?;
    let codes: Vec<String> = entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| {
            let usable = entry.len() >= MIN_COMMAND_LEN;
            if !usable && !entry.is_empty() {
                debug!("Skipping queued entry '{}'", entry);
            }
            usable
        })
        .map(str::to_owned)
        .collect();

    if !codes.is_empty() {
        info!("📨 Executing {} queued command(s)", codes.len());
    }
    Ok(issue_commands(inverter, &codes).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryCommandQueue, ScriptedInverter};
    use tempfile::tempdir;
    use voltherm_types::{ElectricalMode, InverterStatus};

    fn inverter() -> ScriptedInverter {
        ScriptedInverter::new(ElectricalMode::Battery, InverterStatus::default())
    }

    #[test]
    fn test_missing_queue_file_is_empty() {
        let dir = tempdir().unwrap();
        let queue = FileCommandQueue::new(dir.path().join("commands.txt"));

        assert!(queue.drain().unwrap().is_empty());
    }

    #[test]
    fn test_drain_consumes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.txt");
        fs::write(&path, "PCP03\nPOP02\n").unwrap();
        let queue = FileCommandQueue::new(&path);

        assert_eq!(queue.drain().unwrap(), vec!["PCP03", "POP02", ""]);
        assert!(!path.exists());
        assert!(queue.drain().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_entries_are_skipped() {
        let queue = MemoryCommandQueue::new();
        for entry in ["PCP03", "", "ab", "  \r", "POP02\r"] {
            queue.push(entry);
        }
        let inverter = inverter();

        let results = execute_pending(&queue, &inverter).await.unwrap();

        assert_eq!(inverter.sent(), vec!["PCP03", "POP02"]);
        assert!(results.iter().all(AckResult::is_acknowledged));
    }

    #[tokio::test]
    async fn test_rejected_command_does_not_stop_the_rest() {
        let inverter = inverter();
        inverter.reject("PCP00");

        let results = issue_commands(
            &inverter,
            &["PCP00".to_owned(), "POP00".to_owned()],
        )
        .await;

        assert_eq!(
            results,
            vec![
                AckResult::failed("PCP00", "NAK"),
                AckResult::acknowledged("POP00"),
            ]
        );
    }
}
