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

use crate::client::BridgeClient;
use crate::response::{MODE_QUERY, STATUS_QUERY, decode_status, device_mode, evaluate_ack};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};
use voltherm_core::InverterPort;
use voltherm_types::{AckResult, ElectricalMode, InverterStatus};

/// Inverter port backed by the bridge service
#[derive(Debug, Clone)]
pub struct BridgeInverter {
    client: BridgeClient,
}

impl BridgeInverter {
    pub fn new(client: BridgeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InverterPort for BridgeInverter {
    async fn electrical_mode(&self) -> ElectricalMode {
        match self.client.query(MODE_QUERY).await {
            Ok(response) => device_mode(&response),
            Err(e) => {
                warn!("Failed to read inverter mode: {}", e);
                ElectricalMode::Unknown
            }
        }
    }

    async fn full_status(&self) -> Result<InverterStatus> {
        let response = self.client.query(STATUS_QUERY).await?;
        Ok(decode_status(&response)?)
    }

    async fn send_command(&self, code: &str) -> AckResult {
        debug!("Exec command: {}", code);
        match self.client.command(code).await {
            Ok(response) => evaluate_ack(code, &response),
            Err(e) => AckResult::failed(code, e.to_string()),
        }
    }

    fn name(&self) -> &str {
        self.client.base_url()
    }
}
