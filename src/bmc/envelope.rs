//! Strongly-typed JSON envelope the BMC worker's stdout is decoded into
//! (§9 REDESIGN FLAGS: "JSON envelope parsing").

use serde::{Deserialize, Serialize};

/// Fixed header label carried by a `sensor read` envelope body (§6 contract).
pub const SENSOR_SAMPLE_LABEL: &str = "hwmon-samples";

/// Substring a `power status` stdout must contain to mean "power is on" (§4.1).
pub const POWER_ON_SUBSTRING: &str = "Chassis Power is on";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSample {
    pub name: String,
    pub unit: String,
    pub status: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub discrete: bool,
    #[serde(default)]
    pub percent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSampleEnvelope {
    pub label: String,
    pub samples: Vec<SensorSample>,
}

impl SensorSampleEnvelope {
    /// Decode, rejecting silently-mismatched envelopes via a `Protocol` error
    /// rather than accepting whatever shape happened to parse (§9).
    pub fn decode(raw: &str) -> crate::core::error::CoreResult<Vec<SensorSample>> {
        let envelope: SensorSampleEnvelope = serde_json::from_str(raw)
            .map_err(|e| crate::core::error::CoreError::Protocol(format!("malformed sensor envelope: {e}")))?;
        if envelope.label != SENSOR_SAMPLE_LABEL {
            return Err(crate::core::error::CoreError::Protocol(format!(
                "unexpected envelope header label {:?}, expected {SENSOR_SAMPLE_LABEL:?}",
                envelope.label
            )));
        }
        Ok(envelope.samples)
    }
}
