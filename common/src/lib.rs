pub mod calibration;
pub mod config;
pub mod error;
pub mod max6675;
pub mod node;
pub mod sampler;
pub mod telemetry;
pub mod temperature;
pub mod topics;
pub mod types;

pub use calibration::Calibration;
pub use config::{
    resolve_stored, CalibrationConfig, CloudConfig, ConfigSource, FieldMap, LinkPolicy,
    NetworkConfig, PublishConfig, RuntimeConfig, SamplingConfig,
};
pub use error::{LinkError, PublishError, SensorError};
pub use max6675::Max6675;
pub use node::{CycleOutcome, CycleReport, SensorChannels, SensorNode};
pub use sampler::{AnalogInput, AnalogSampler};
pub use telemetry::{
    parse_update_response, FieldUpdate, TelemetryPublisher, TelemetrySink, WifiLink,
};
pub use temperature::{TemperatureReader, Thermocouple};
pub use topics::*;
pub use types::{Readings, TemperatureReading};
