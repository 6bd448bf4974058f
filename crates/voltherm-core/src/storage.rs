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

use crate::ports::{LedgerStore, SampleDensity};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use voltherm_types::{ElectricalMode, NewTransition, StatusSample, TransitionRecord};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS status_samples (
        id                                  INTEGER PRIMARY KEY AUTOINCREMENT,
        sampled_at                          INTEGER NOT NULL,
        inverter_number                     INTEGER NOT NULL,
        ac_input_voltage                    REAL,
        ac_input_frequency                  REAL,
        ac_output_voltage                   REAL,
        ac_output_frequency                 REAL,
        ac_output_apparent_power            REAL,
        ac_output_active_power              REAL,
        bus_voltage                         REAL,
        battery_voltage                     REAL,
        battery_charging_current            REAL,
        inverter_heat_sink_temperature      REAL,
        pv_input_current_for_battery        REAL,
        pv_input_voltage                    REAL,
        battery_discharge_current           REAL,
        pv_input_power                      REAL,
        heater_on                           INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_status_samples_time
        ON status_samples(sampled_at);

    CREATE TABLE IF NOT EXISTS solar_actions (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at         TEXT NOT NULL,
        electrical_mode     TEXT NOT NULL,
        previous_mode       TEXT NOT NULL,
        new_mode            TEXT NOT NULL,
        battery_volts       REAL NOT NULL,
        pv_power_w          REAL NOT NULL,
        heater_target_temp  REAL NOT NULL,
        heater_enabled      INTEGER NOT NULL,
        commands            TEXT NOT NULL,
        description         TEXT NOT NULL
    );";

/// SQLite backed ledger store: one table for status samples, one for
/// mode transitions.
#[derive(Debug)]
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn append_transition(&self, record: &TransitionRecord) -> Result<()> {
        let conn = self.conn.lock();
        let t = &record.transition;
        conn.execute(
            "INSERT INTO solar_actions (recorded_at, electrical_mode, previous_mode, new_mode, battery_volts, pv_power_w, heater_target_temp, heater_enabled, commands, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.recorded_at,
                t.electrical_mode.as_str(),
                t.previous_mode,
                t.new_mode,
                t.battery_volts,
                t.pv_power_w,
                t.heater_target_temp,
                t.heater_enabled,
                t.commands,
                t.description,
            ],
        )
        .context("Failed to insert transition")?;
        Ok(())
    }

    fn append_sample(&self, sample: &StatusSample) -> Result<()> {
        let conn = self.conn.lock();
        let s = &sample.status;
        conn.execute(
            "INSERT INTO status_samples (sampled_at, inverter_number, ac_input_voltage, ac_input_frequency, ac_output_voltage, ac_output_frequency, ac_output_apparent_power, ac_output_active_power, bus_voltage, battery_voltage, battery_charging_current, inverter_heat_sink_temperature, pv_input_current_for_battery, pv_input_voltage, battery_discharge_current, pv_input_power, heater_on)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                sample.sampled_at.timestamp(),
                sample.inverter_number,
                s.ac_input_voltage,
                s.ac_input_frequency,
                s.ac_output_voltage,
                s.ac_output_frequency,
                s.ac_output_apparent_power,
                s.ac_output_active_power,
                s.bus_voltage,
                s.battery_voltage,
                s.battery_charging_current,
                s.inverter_heat_sink_temperature,
                s.pv_input_current_for_battery,
                s.pv_input_voltage,
                s.battery_discharge_current,
                s.pv_input_power,
                sample.heater_on,
            ],
        )
        .context("Failed to insert status sample")?;
        Ok(())
    }

    fn sample_density(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<SampleDensity> {
        let conn = self.conn.lock();
        let (first, last, samples, heater_on): (Option<i64>, Option<i64>, i64, i64) = conn
            .query_row(
                "SELECT MIN(sampled_at), MAX(sampled_at), COUNT(*), COALESCE(SUM(heater_on), 0)
                 FROM status_samples WHERE sampled_at >= ?1 AND sampled_at < ?2",
                params![start.timestamp(), end.timestamp()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .context("Failed to query sample density")?;

        Ok(SampleDensity {
            first: first.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            last: last.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            samples: u64::try_from(samples).unwrap_or(0),
            heater_on_samples: u64::try_from(heater_on).unwrap_or(0),
        })
    }

    fn recent_transitions(&self, limit: usize) -> Result<Vec<TransitionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT recorded_at, electrical_mode, previous_mode, new_mode, battery_volts, pv_power_w, heater_target_temp, heater_enabled, commands, description
             FROM solar_actions ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(TransitionRecord {
                    recorded_at: row.get(0)?,
                    transition: NewTransition {
                        electrical_mode: ElectricalMode::from(row.get::<_, String>(1)?),
                        previous_mode: row.get(2)?,
                        new_mode: row.get(3)?,
                        battery_volts: row.get(4)?,
                        pv_power_w: row.get(5)?,
                        heater_target_temp: row.get(6)?,
                        heater_enabled: row.get(7)?,
                        commands: row.get(8)?,
                        description: row.get(9)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;
    use voltherm_types::InverterStatus;

    fn transition(previous: &str, new: &str) -> NewTransition {
        NewTransition {
            electrical_mode: ElectricalMode::Line,
            previous_mode: previous.to_owned(),
            new_mode: new.to_owned(),
            battery_volts: 50.0,
            pv_power_w: 0.0,
            heater_target_temp: 45.0,
            heater_enabled: true,
            commands: "PCP00, POP00".to_owned(),
            description: "Activating night charge + heater mode".to_owned(),
        }
    }

    fn sample(at: DateTime<Utc>, heater_on: bool) -> StatusSample {
        StatusSample {
            sampled_at: at,
            inverter_number: 1,
            status: InverterStatus {
                battery_voltage: 52.0,
                ..InverterStatus::default()
            },
            heater_on,
        }
    }

    #[test]
    fn test_transitions_round_trip_newest_first() {
        let store = SqliteLedgerStore::in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap();

        let first = TransitionRecord::stamp(transition("solar_power", "night_charge_heater"), at);
        let second = TransitionRecord::stamp(
            transition("night_charge_heater", "night_heater"),
            at + Duration::minutes(30),
        );
        store.append_transition(&first).unwrap();
        store.append_transition(&second).unwrap();

        let recent = store.recent_transitions(10).unwrap();
        assert_eq!(recent, vec![second.clone(), first]);
        assert_eq!(store.recent_transitions(1).unwrap(), vec![second]);
    }

    #[test]
    fn test_sample_density_window_is_half_open() {
        let store = SqliteLedgerStore::in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(1);

        store.append_sample(&sample(start, true)).unwrap();
        store
            .append_sample(&sample(start + Duration::seconds(5), false))
            .unwrap();
        store
            .append_sample(&sample(start + Duration::seconds(10), true))
            .unwrap();
        store.append_sample(&sample(end, true)).unwrap();

        let density = store.sample_density(start, end).unwrap();
        assert_eq!(density.samples, 3);
        assert_eq!(density.heater_on_samples, 2);
        assert_eq!(density.first, Some(start));
        assert_eq!(density.last, Some(start + Duration::seconds(10)));
    }

    #[test]
    fn test_empty_window_density() {
        let store = SqliteLedgerStore::in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let density = store
            .sample_density(start, start + Duration::days(1))
            .unwrap();
        assert_eq!(density, SampleDensity::default());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("voltherm.db");

        let store = SqliteLedgerStore::open(&path).unwrap();
        store
            .append_sample(&sample(Utc::now(), false))
            .unwrap();

        assert!(path.exists());
    }
}
