//! Minimal MAX6675 cold-junction-compensated K-type thermocouple reader.
//!
//! The chip shifts out a 16-bit big-endian frame on every chip-select:
//! bit 15 is a dummy zero, bits 14..3 hold the temperature in 0.25 °C steps,
//! bit 2 is set when the thermocouple input is open, bits 1..0 are fixed.

use embedded_hal::spi::SpiDevice;

use crate::{error::SensorError, temperature::Thermocouple};

const OPEN_INPUT_BIT: u16 = 0x0004;
const CELSIUS_PER_COUNT: f32 = 0.25;

/// Decodes a raw frame. Returns NaN when the thermocouple is disconnected.
pub fn decode_frame(frame: u16) -> f32 {
    if frame & OPEN_INPUT_BIT != 0 {
        return f32::NAN;
    }
    f32::from((frame >> 3) & 0x0FFF) * CELSIUS_PER_COUNT
}

pub struct Max6675<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> Max6675<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn read_frame(&mut self) -> Result<u16, SensorError> {
        let mut buf = [0_u8; 2];
        self.spi
            .read(&mut buf)
            .map_err(|err| SensorError::Spi(format!("{err:?}")))?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> Thermocouple for Max6675<SPI> {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        self.read_frame().map(decode_frame)
    }
}
