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

//! Interpretation of bridge response maps.
//!
//! The bridge answers every query with a flat JSON object keyed by field
//! name. Fields come either as `{"value": .., "unit": ..}` objects (full
//! status) or as `[value, unit]` lists (raw command responses).

use crate::errors::{BridgeError, BridgeResult};
use serde_json::{Map, Value};
use voltherm_types::{AckResult, ElectricalMode, InverterStatus};

pub type ResponseMap = Map<String, Value>;

/// Query code for the operating mode
pub const MODE_QUERY: &str = "QMOD";
/// Query code for the general status block
pub const STATUS_QUERY: &str = "QPIGS";

/// Numeric or textual payload of one response field
fn field_value(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(obj) => obj.get("value"),
        Value::Array(items) => items.first(),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Some(value),
    }
}

fn field_number(value: &Value) -> Option<f64> {
    match field_value(value)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Electrical mode out of a `QMOD` response, `Unknown` if absent.
pub fn device_mode(response: &ResponseMap) -> ElectricalMode {
    response
        .get("device_mode")
        .and_then(field_value)
        .and_then(Value::as_str)
        .map_or(ElectricalMode::Unknown, ElectricalMode::from)
}

/// Decode a full status response. A response carrying an `error` key is a
/// failed sample.
#[expect(clippy::cast_possible_truncation)]
pub fn decode_status(response: &ResponseMap) -> BridgeResult<InverterStatus> {
    if let Some(error) = response.get("error") {
        let message = error
            .as_str()
            .map_or_else(|| error.to_string(), str::to_owned);
        return Err(BridgeError::DeviceError(message));
    }

    let field = |name: &str| -> BridgeResult<f32> {
        response
            .get(name)
            .and_then(field_number)
            .map(|v| v as f32)
            .ok_or_else(|| BridgeError::MissingField(name.to_owned()))
    };

    Ok(InverterStatus {
        ac_input_voltage: field("ac_input_voltage")?,
        ac_input_frequency: field("ac_input_frequency")?,
        ac_output_voltage: field("ac_output_voltage")?,
        ac_output_frequency: field("ac_output_frequency")?,
        ac_output_apparent_power: field("ac_output_apparent_power")?,
        ac_output_active_power: field("ac_output_active_power")?,
        bus_voltage: field("bus_voltage")?,
        battery_voltage: field("battery_voltage")?,
        battery_charging_current: field("battery_charging_current")?,
        inverter_heat_sink_temperature: field("inverter_heat_sink_temperature")?,
        pv_input_current_for_battery: field("pv_input_current_for_battery")?,
        pv_input_voltage: field("pv_input_voltage")?,
        battery_discharge_current: field("battery_discharge_current")?,
        pv_input_power: field("pv_input_power")?,
    })
}

fn contains_ack(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some("ACK")),
        Value::Object(obj) => obj.get("value").and_then(Value::as_str) == Some("ACK"),
        Value::String(s) => s == "ACK",
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// A command is acknowledged iff some response key is contained in the
/// issued code and that key's value carries `ACK`.
pub fn evaluate_ack(code: &str, response: &ResponseMap) -> AckResult {
    let mut matched = false;
    for (key, value) in response {
        if !code.contains(key.as_str()) {
            continue;
        }
        matched = true;
        if contains_ack(value) {
            return AckResult::acknowledged(code);
        }
    }

    if matched {
        AckResult::failed(code, "NAK")
    } else {
        AckResult::failed(code, "response does not mention the command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ResponseMap {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_device_mode() {
        assert_eq!(
            device_mode(&map(json!({"device_mode": ["Battery", ""]}))),
            ElectricalMode::Battery
        );
        assert_eq!(
            device_mode(&map(json!({"device_mode": {"value": "Line", "unit": ""}}))),
            ElectricalMode::Line
        );
        assert_eq!(device_mode(&map(json!({}))), ElectricalMode::Unknown);
        assert_eq!(
            device_mode(&map(json!({"device_mode": ["Fault", ""]}))),
            ElectricalMode::Other("Fault".to_owned())
        );
    }

    #[test]
    fn test_ack_requires_key_contained_in_code() {
        let response = map(json!({"PCP": ["ACK", ""]}));
        assert!(evaluate_ack("PCP03", &response).is_acknowledged());

        let nak = map(json!({"PCP": ["NAK", ""]}));
        assert_eq!(evaluate_ack("PCP03", &nak), AckResult::failed("PCP03", "NAK"));

        let other = map(json!({"POP": ["ACK", ""]}));
        assert!(!evaluate_ack("PCP03", &other).is_acknowledged());
    }

    #[test]
    fn test_decode_status_error_key() {
        let response = map(json!({"error": "serial timeout"}));

        assert!(matches!(
            decode_status(&response),
            Err(BridgeError::DeviceError(msg)) if msg == "serial timeout"
        ));
    }

    #[test]
    fn test_decode_status_missing_field() {
        let response = map(json!({"battery_voltage": {"value": 52.1, "unit": "V"}}));

        assert!(matches!(
            decode_status(&response),
            Err(BridgeError::MissingField(name)) if name == "ac_input_voltage"
        ));
    }
}
