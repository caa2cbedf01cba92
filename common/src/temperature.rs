use log::{info, warn};

use crate::{error::SensorError, types::TemperatureReading};

pub trait Thermocouple {
    /// One reading in °C. NaN signals an invalid reading.
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

impl<T: Thermocouple + ?Sized> Thermocouple for &mut T {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        (**self).read_celsius()
    }
}

pub const INVALID_TEMPERATURE_C: f32 = 0.0;

pub struct TemperatureReader<T> {
    thermocouple: T,
}

impl<T: Thermocouple> TemperatureReader<T> {
    pub fn new(thermocouple: T) -> Self {
        Self { thermocouple }
    }

    pub fn read(&mut self) -> TemperatureReading {
        match self.thermocouple.read_celsius() {
            Ok(celsius) if celsius.is_finite() => {
                info!("[thermocouple] Temperature: {celsius:.2}°C");
                TemperatureReading {
                    celsius,
                    valid: true,
                }
            }
            Ok(_) => {
                warn!("thermocouple returned an invalid reading; reporting {INVALID_TEMPERATURE_C}");
                Self::invalid()
            }
            Err(err) => {
                warn!("thermocouple read failed: {err}; reporting {INVALID_TEMPERATURE_C}");
                Self::invalid()
            }
        }
    }

    fn invalid() -> TemperatureReading {
        TemperatureReading {
            celsius: INVALID_TEMPERATURE_C,
            valid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct Fixed(Result<f32, SensorError>);

    impl Thermocouple for Fixed {
        fn read_celsius(&mut self) -> Result<f32, SensorError> {
            self.0.clone()
        }
    }

    #[test]
    fn passes_through_valid_reading() {
        let mut reader = TemperatureReader::new(Fixed(Ok(231.5)));
        assert_eq!(
            reader.read(),
            TemperatureReading {
                celsius: 231.5,
                valid: true
            }
        );
    }

    #[test]
    fn nan_falls_back_to_zero() {
        let mut reader = TemperatureReader::new(Fixed(Ok(f32::NAN)));
        assert_eq!(
            reader.read(),
            TemperatureReading {
                celsius: 0.0,
                valid: false
            }
        );
    }

    #[test]
    fn driver_error_falls_back_to_zero() {
        let mut reader =
            TemperatureReader::new(Fixed(Err(SensorError::Spi("bus fault".to_string()))));
        let reading = reader.read();

        assert_eq!(reading.celsius, 0.0);
        assert!(!reading.valid);
    }

    #[test]
    fn infinite_reading_falls_back_to_zero() {
        for celsius in [f32::INFINITY, f32::NEG_INFINITY] {
            let mut reader = TemperatureReader::new(Fixed(Ok(celsius)));
            assert_eq!(
                reader.read(),
                TemperatureReading {
                    celsius: 0.0,
                    valid: false
                }
            );
        }
    }
}
