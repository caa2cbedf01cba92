use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("adc read failed: {0}")]
    Adc(String),
    #[error("spi transfer failed: {0}")]
    Spi(String),
    #[error("no valid samples out of {attempted} attempts")]
    NoSamples { attempted: u8 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("wifi driver error: {0}")]
    Driver(String),
    #[error("wifi still disconnected after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublishError {
    #[error("no fields to publish")]
    Empty,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint returned HTTP {0}")]
    Status(u16),
    #[error("endpoint rejected the update")]
    Rejected,
    #[error("unexpected endpoint response `{0}`")]
    BadResponse(String),
}
