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

use crate::error::{ControlError, ControlResult};
use crate::ports::LedgerStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::info;
use voltherm_types::{NewTransition, StatusSample, TransitionRecord};

/// Audit trail of mode changes plus the heated-minutes diagnostic.
#[derive(Clone)]
pub struct TransitionLedger {
    store: Arc<dyn LedgerStore>,
}

impl fmt::Debug for TransitionLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionLedger").finish_non_exhaustive()
    }
}

impl TransitionLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Stamp and append one transition. A failed write is returned to the
    /// caller, which must not treat the transition as applied.
    pub fn record(&self, transition: NewTransition) -> ControlResult<TransitionRecord> {
        let record = TransitionRecord::stamp(transition, Utc::now());
        self.store
            .append_transition(&record)
            .map_err(ControlError::Ledger)?;

        info!(
            "📒 Recorded transition {} -> {} ({})",
            record.transition.previous_mode, record.transition.new_mode, record.transition.description
        );
        Ok(record)
    }

    pub fn record_sample(&self, sample: &StatusSample) -> Result<()> {
        self.store.append_sample(sample)
    }

    /// Heated minutes for the local calendar day `today - day_offset`.
    pub fn heated_minutes(&self, day_offset: u32) -> Result<f64> {
        let (start, end) = local_day_bounds(Local::now(), day_offset)?;
        self.heated_minutes_between(start, end)
    }

    /// Heated minutes over `[start, end)`
    pub fn heated_minutes_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64> {
        Ok(self.store.sample_density(start, end)?.heated_minutes())
    }

    /// Most recent transitions, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<TransitionRecord>> {
        self.store.recent_transitions(limit)
    }
}

/// UTC bounds of the local calendar day `day_offset` days before `now`.
pub fn local_day_bounds(
    now: DateTime<Local>,
    day_offset: u32,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let day = now
        .date_naive()
        .checked_sub_days(Days::new(u64::from(day_offset)))
        .context("Day offset out of range")?;
    let next = day.succ_opt().context("Day offset out of range")?;

    let start = Local
        .from_local_datetime(&day.and_time(NaiveTime::MIN))
        .earliest()
        .context("Local midnight does not exist")?;
    let end = Local
        .from_local_datetime(&next.and_time(NaiveTime::MIN))
        .earliest()
        .context("Local midnight does not exist")?;

    Ok((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryLedgerStore;
    use chrono::Duration;
    use voltherm_types::{ElectricalMode, InverterStatus};

    fn transition() -> NewTransition {
        NewTransition {
            electrical_mode: ElectricalMode::Battery,
            previous_mode: "solar_init".to_owned(),
            new_mode: "solar_heater".to_owned(),
            battery_volts: 55.0,
            pv_power_w: 1800.0,
            heater_target_temp: 55.0,
            heater_enabled: true,
            commands: "PCP03, POP02".to_owned(),
            description: "Activate Solar heater".to_owned(),
        }
    }

    #[test]
    fn test_record_stamps_and_appends() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = TransitionLedger::new(store.clone());

        let before = Utc::now();
        let record = ledger.record(transition()).unwrap();

        assert!(record.recorded_at >= before);
        assert_eq!(store.transitions(), vec![record]);
    }

    #[test]
    fn test_record_failure_is_reported() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.fail_transitions(true);
        let ledger = TransitionLedger::new(store.clone());

        assert!(matches!(
            ledger.record(transition()),
            Err(ControlError::Ledger(_))
        ));
        assert!(store.transitions().is_empty());
    }

    #[test]
    fn test_heated_minutes_today() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = TransitionLedger::new(store.clone());
        let (start, _) = local_day_bounds(Local::now(), 0).unwrap();

        // 4 samples over 15 s, 2 with the heater on -> 3.75 s * 2 = 7.5 s
        for (offset, heater_on) in [(0, true), (5, false), (10, true), (15, false)] {
            ledger
                .record_sample(&StatusSample {
                    sampled_at: start + Duration::seconds(offset),
                    inverter_number: 1,
                    status: InverterStatus::default(),
                    heater_on,
                })
                .unwrap();
        }

        let minutes = ledger.heated_minutes(0).unwrap();
        assert!((minutes - 7.5 / 60.0).abs() < 1e-9);
        assert!(ledger.heated_minutes(1).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn test_day_bounds_cover_one_day() {
        let now = Local::now();
        let (start, end) = local_day_bounds(now, 0).unwrap();
        let (yesterday_start, yesterday_end) = local_day_bounds(now, 1).unwrap();

        assert!(start <= now.with_timezone(&Utc));
        assert!(now.with_timezone(&Utc) < end);
        assert_eq!(yesterday_end, start);
        assert!(yesterday_start < yesterday_end);
    }
}
