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

mod config;
mod hardware;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use config::AppConfig;
use hardware::SysfsGpio;
use voltherm_bridge::{BridgeClient, BridgeInverter};
use voltherm_core::fakes::{MemoryIo, ScriptedInverter};
use voltherm_core::{
    ActuatorSequencer, ControlLoop, DigitalIo, FileCommandQueue, FileSetpointStore, InverterPort,
    ModeDecisionEngine, SqliteLedgerStore, TokioDelay, TransitionLedger,
};
use voltherm_types::{ElectricalMode, InverterStatus};

#[derive(Parser)]
#[command(name = "voltherm")]
#[command(author, version, about = "Voltherm - solar battery and water heater controller")]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop (default)
    Run,

    /// Print the heated minutes of one day
    HeatedMinutes {
        /// Days back from today
        #[arg(long, default_value_t = 0)]
        day_offset: u32,
    },

    /// Print the most recent mode transitions
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Move the thermostat servo and persist the setpoint
    SetTemp {
        /// Target temperature in °C, clamped to 30..=70
        degrees: f32,
    },

    /// Validate the configuration and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, source) = AppConfig::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.system.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    info!("✅ Loaded configuration from {}", source);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::HeatedMinutes { day_offset } => {
            let ledger = open_ledger(&config)?;
            println!("{:.1}", ledger.heated_minutes(day_offset)?);
            Ok(())
        }
        Command::History { limit } => {
            let ledger = open_ledger(&config)?;
            for record in ledger.recent(limit)? {
                let t = &record.transition;
                println!(
                    "{}  {:<8} {} -> {}  {:.2}V {:.0}W  temp={} heater={}  [{}]  {}",
                    record.recorded_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                    t.electrical_mode,
                    t.previous_mode,
                    t.new_mode,
                    t.battery_volts,
                    t.pv_power_w,
                    t.heater_target_temp,
                    t.heater_enabled,
                    t.commands,
                    t.description
                );
            }
            Ok(())
        }
        Command::SetTemp { degrees } => {
            let actuators = build_actuators(&config)?;
            let applied = actuators.set_thermostat(degrees).await?;
            println!("Thermostat set to {applied}°C");
            Ok(())
        }
        Command::CheckConfig => {
            check_config(&config);
            Ok(())
        }
    }
}

async fn run(config: &AppConfig) -> Result<()> {
    info!("🚀 Starting Voltherm");
    info!("   Debug mode: {}", config.system.debug_mode);
    info!("   Poll interval: {}ms", config.system.poll_interval_ms);
    info!("   Database: {}", config.storage.database_path.display());

    let inverter = build_inverter(config)?;
    info!("🔌 Inverter: {}", inverter.name());

    let actuators = Arc::new(build_actuators(config)?);
    let ledger = open_ledger(config)?;
    let engine = ModeDecisionEngine::new(config.catalog(), actuators, ledger, inverter.clone())?;
    let queue = Arc::new(FileCommandQueue::new(&config.storage.command_queue_path));

    let mut control = ControlLoop::new(engine, inverter, queue, config.loop_settings());
    if let Err(e) = control.bootstrap(&config.bootstrap_settings()).await {
        error!("❌ Bootstrap failed: {}", e);
    }

    tokio::select! {
        () = control.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("👋 Shutting down");
        }
    }
    Ok(())
}

fn open_ledger(config: &AppConfig) -> Result<TransitionLedger> {
    let store = SqliteLedgerStore::open(&config.storage.database_path)?;
    Ok(TransitionLedger::new(Arc::new(store)))
}

fn build_actuators(config: &AppConfig) -> Result<ActuatorSequencer> {
    let io: Arc<dyn DigitalIo> = if config.system.debug_mode {
        Arc::new(MemoryIo::new())
    } else {
        Arc::new(SysfsGpio::new(
            &config.gpio.sysfs_root,
            config.gpio.servo_pwm_pin,
            config.gpio.pwm_chip,
            config.gpio.pwm_channel,
        ))
    };
    info!("📟 Pin driver: {}", io.name());

    Ok(ActuatorSequencer::new(
        io,
        Arc::new(TokioDelay),
        Arc::new(FileSetpointStore::new(&config.storage.setpoint_path)),
        config.gpio.pin_assignment()?,
    ))
}

fn build_inverter(config: &AppConfig) -> Result<Arc<dyn InverterPort>> {
    if config.system.debug_mode {
        let status = InverterStatus {
            ac_input_voltage: 230.0,
            ac_input_frequency: 50.0,
            ac_output_voltage: 230.0,
            ac_output_frequency: 50.0,
            battery_voltage: 52.0,
            pv_input_voltage: 300.0,
            pv_input_power: 800.0,
            ..InverterStatus::default()
        };
        return Ok(Arc::new(ScriptedInverter::new(ElectricalMode::Battery, status)));
    }

    let client = BridgeClient::new(
        config.inverter.bridge_url.clone(),
        Duration::from_secs(config.inverter.request_timeout_secs),
    )?;
    Ok(Arc::new(BridgeInverter::new(client)))
}

fn check_config(config: &AppConfig) {
    let catalog = config.catalog();
    println!("Configuration OK");
    println!("  debug mode:     {}", config.system.debug_mode);
    println!("  bridge:         {}", config.inverter.bridge_url);
    println!("  heater pins:    {:?}", config.gpio.heater_pins);
    println!(
        "  servo pins:     pwm={} power={}",
        config.gpio.servo_pwm_pin, config.gpio.servo_power_pin
    );
    println!("  database:       {}", config.storage.database_path.display());
    println!(
        "  catalog:        {} modes, {} rules",
        catalog.modes.len(),
        catalog.rules.len()
    );
    if let Ok(warnings) = catalog.validate() {
        for warning in warnings {
            println!("  warning:        {warning}");
        }
    }
}
