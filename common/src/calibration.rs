use crate::config::CalibrationConfig;

/// Linear conversions from averaged ADC counts to physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    config: CalibrationConfig,
}

impl Calibration {
    pub fn new(mut config: CalibrationConfig) -> Self {
        config.sanitize();
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Voltage seen at the ADC pin.
    pub fn pin_volts(&self, avg_raw: f32) -> f32 {
        avg_raw * self.config.adc_ref_volts / self.config.adc_full_scale
    }

    /// Supply voltage behind the divider, corrected by the fixed offset.
    pub fn volts(&self, avg_raw: f32) -> f32 {
        self.pin_volts(avg_raw) / self.config.divider_ratio - self.config.voltage_offset_v
    }

    /// Current through the ACS712, signed around its mid-supply zero point.
    pub fn milliamps(&self, avg_raw: f32) -> f32 {
        (self.pin_volts(avg_raw) - self.config.current_zero_v)
            / self.config.current_sensitivity_v_per_a
            * 1000.0
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}
