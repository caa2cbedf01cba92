use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::{config::SamplingConfig, error::SensorError};

/// A single-ended ADC channel returning raw counts.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

impl<T: AnalogInput + ?Sized> AnalogInput for &mut T {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        (**self).read_raw()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogSampler {
    samples: u8,
    settle_delay_ms: u32,
}

impl AnalogSampler {
    pub fn new(config: &SamplingConfig) -> Self {
        let mut config = config.clone();
        config.sanitize();
        Self {
            samples: config.samples_per_reading,
            settle_delay_ms: config.settle_delay_ms,
        }
    }

    #[cfg(test)]
    pub(crate) fn samples(&self) -> u8 {
        self.samples
    }

    /// Averages `samples` reads, settling after each attempt. Failed reads are skipped.
    pub fn average<A, D>(&self, input: &mut A, delay: &mut D) -> Result<f32, SensorError>
    where
        A: AnalogInput + ?Sized,
        D: DelayNs + ?Sized,
    {
        let mut total: u32 = 0;
        let mut taken: u32 = 0;

        for _ in 0..self.samples {
            match input.read_raw() {
                Ok(raw) => {
                    total = total.saturating_add(u32::from(raw));
                    taken += 1;
                }
                Err(err) => warn!("adc sample skipped: {err}"),
            }
            delay.delay_ms(self.settle_delay_ms);
        }

        if taken == 0 {
            return Err(SensorError::NoSamples {
                attempted: self.samples,
            });
        }

        let average = total as f32 / taken as f32;
        debug!("averaged {taken}/{} adc samples: {average:.1}", self.samples);
        Ok(average)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::*;

    struct ScriptedAdc(VecDeque<Result<u16, SensorError>>);

    impl AnalogInput for ScriptedAdc {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(SensorError::Adc("script exhausted".into())))
        }
    }

    #[derive(Default)]
    struct RecordingDelay(Vec<u32>);

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.push(ns / 1_000_000);
        }

        fn delay_ms(&mut self, ms: u32) {
            self.0.push(ms);
        }
    }

    fn sampler(samples: u8, settle_delay_ms: u32) -> AnalogSampler {
        AnalogSampler::new(&SamplingConfig {
            samples_per_reading: samples,
            settle_delay_ms,
        })
    }

    #[test]
    fn averages_ten_samples_with_settling_delay() {
        let mut adc = ScriptedAdc((1..=10).map(|n| Ok(n * 100)).collect());
        let mut delay = RecordingDelay::default();

        let average = sampler(10, 10).average(&mut adc, &mut delay).unwrap();

        assert_eq!(average, 550.0);
        assert_eq!(delay.0, vec![10; 10]);
    }

    #[test]
    fn keeps_fractional_average() {
        let mut adc = ScriptedAdc(vec![Ok(1), Ok(2)].into());
        let mut delay = RecordingDelay::default();

        let average = sampler(2, 0).average(&mut adc, &mut delay).unwrap();

        assert_eq!(average, 1.5);
    }

    #[test]
    fn skips_failed_reads_but_still_settles() {
        let mut adc = ScriptedAdc(
            vec![
                Ok(2000),
                Err(SensorError::Adc("timeout".into())),
                Ok(2100),
            ]
            .into(),
        );
        let mut delay = RecordingDelay::default();

        let average = sampler(3, 10).average(&mut adc, &mut delay).unwrap();

        assert_eq!(average, 2050.0);
        assert_eq!(delay.0.len(), 3);
    }

    #[test]
    fn all_reads_failing_is_an_error() {
        let mut adc = ScriptedAdc(VecDeque::new());
        let mut delay = RecordingDelay::default();

        let result = sampler(4, 10).average(&mut adc, &mut delay);

        assert_eq!(result, Err(SensorError::NoSamples { attempted: 4 }));
    }

    #[test]
    fn zero_samples_is_raised_to_one() {
        let sampler = sampler(0, 10);
        assert_eq!(sampler.samples(), 1);

        let mut adc = ScriptedAdc(vec![Ok(4095)].into());
        let mut delay = RecordingDelay::default();
        assert_eq!(sampler.average(&mut adc, &mut delay), Ok(4095.0));
    }
}
