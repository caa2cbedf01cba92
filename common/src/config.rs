use std::fmt::Display;

use log::warn;
use serde::{Deserialize, Serialize};

pub const MIN_PUBLISH_INTERVAL_MS: u64 = 15_000;
pub const MAX_SAMPLES_PER_READING: u8 = 64;
pub const MAX_SETTLE_DELAY_MS: u32 = 1_000;
pub const MAX_FIELD_NUMBER: u8 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub samples_per_reading: u8,
    pub settle_delay_ms: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples_per_reading: 10,
            settle_delay_ms: 10,
        }
    }
}

impl SamplingConfig {
    pub fn sanitize(&mut self) {
        self.samples_per_reading = self.samples_per_reading.clamp(1, MAX_SAMPLES_PER_READING);
        self.settle_delay_ms = self.settle_delay_ms.min(MAX_SETTLE_DELAY_MS);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub adc_ref_volts: f32,
    pub adc_full_scale: f32,
    pub divider_ratio: f32,
    pub voltage_offset_v: f32,
    pub current_zero_v: f32,
    pub current_sensitivity_v_per_a: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            adc_ref_volts: 3.3,
            adc_full_scale: 4095.0,
            divider_ratio: 0.2,
            voltage_offset_v: 0.18,
            current_zero_v: 1.65,
            current_sensitivity_v_per_a: 0.185,
        }
    }
}

impl CalibrationConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        fn positive_or(value: &mut f32, fallback: f32) {
            if !value.is_finite() || *value <= 0.0 {
                *value = fallback;
            }
        }

        positive_or(&mut self.adc_ref_volts, defaults.adc_ref_volts);
        positive_or(&mut self.adc_full_scale, defaults.adc_full_scale);
        positive_or(&mut self.divider_ratio, defaults.divider_ratio);
        positive_or(
            &mut self.current_sensitivity_v_per_a,
            defaults.current_sensitivity_v_per_a,
        );

        if !self.voltage_offset_v.is_finite() {
            self.voltage_offset_v = defaults.voltage_offset_v;
        }
        if !self.current_zero_v.is_finite() {
            self.current_zero_v = defaults.current_zero_v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkPolicy {
    pub reconnect_attempts: u32,
    pub retry_delay_ms: u32,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            reconnect_attempts: 20,
            retry_delay_ms: 500,
        }
    }
}

impl LinkPolicy {
    pub fn sanitize(&mut self) {
        self.reconnect_attempts = self.reconnect_attempts.max(1);
        self.retry_delay_ms = self.retry_delay_ms.clamp(50, 10_000);
    }
}

/// Cloud channel field numbers for each published reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub voltage: u8,
    pub current: u8,
    pub temperature: u8,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            voltage: 1,
            current: 2,
            temperature: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub interval_ms: u64,
    pub fields: FieldMap,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            interval_ms: 20_000,
            fields: FieldMap::default(),
        }
    }
}

impl PublishConfig {
    pub fn sanitize(&mut self) {
        self.interval_ms = self.interval_ms.max(MIN_PUBLISH_INTERVAL_MS);

        let defaults = FieldMap::default();
        for (field, fallback) in [
            (&mut self.fields.voltage, defaults.voltage),
            (&mut self.fields.current, defaults.current),
            (&mut self.fields.temperature, defaults.temperature),
        ] {
            if *field == 0 || *field > MAX_FIELD_NUMBER {
                *field = fallback;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub channel_id: u32,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://api.thingspeak.com/update".to_string(),
            api_key: String::new(),
            channel_id: 0,
            mqtt_host: "mqtt3.thingspeak.com".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "powermon-sensor".to_string(),
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub link: LinkPolicy,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

impl RuntimeConfig {
    /// Parses a stored config, filling missing sections with defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn sanitize(&mut self) {
        self.sampling.sanitize();
        self.calibration.sanitize();
        self.link.sanitize();
        self.publish.sanitize();

        if self.cloud.mqtt_port == 0 {
            self.cloud.mqtt_port = CloudConfig::default().mqtt_port;
        }
    }
}

/// Where the boot-time runtime config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Stored,
    Missing,
    Unreadable,
}

impl ConfigSource {
    /// Only a missing record is seeded. An unreadable one is kept as-is so stored
    /// credentials survive a bad edit or a newer schema.
    pub fn should_persist(self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Turns a store lookup into the config to run with, falling back to defaults in memory.
pub fn resolve_stored<E: Display>(
    loaded: Result<Option<RuntimeConfig>, E>,
) -> (RuntimeConfig, ConfigSource) {
    match loaded {
        Ok(Some(runtime)) => (runtime, ConfigSource::Stored),
        Ok(None) => (RuntimeConfig::default(), ConfigSource::Missing),
        Err(err) => {
            warn!("failed to load stored runtime config: {err}; using defaults");
            (RuntimeConfig::default(), ConfigSource::Unreadable)
        }
    }
}
