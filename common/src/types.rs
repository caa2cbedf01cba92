use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub celsius: f32,
    pub valid: bool,
}

/// One cycle's calibrated readings. A `None` channel failed to sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Readings {
    #[serde(rename = "voltageV")]
    pub voltage_v: Option<f32>,
    #[serde(rename = "currentMa")]
    pub current_ma: Option<f32>,
    #[serde(rename = "temperatureC")]
    pub temperature_c: f32,
    #[serde(rename = "temperatureValid")]
    pub temperature_valid: bool,
}
