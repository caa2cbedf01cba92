use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::{
    calibration::Calibration,
    config::RuntimeConfig,
    error::{LinkError, PublishError},
    sampler::{AnalogInput, AnalogSampler},
    telemetry::{TelemetryPublisher, TelemetrySink, WifiLink},
    temperature::{TemperatureReader, Thermocouple},
    types::Readings,
};

/// The three sensor inputs sampled every cycle.
pub struct SensorChannels<V, C, T> {
    pub voltage: V,
    pub current: C,
    pub thermocouple: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published {
        entry_id: Option<u32>,
        link_attempts: u32,
    },
    PublishFailed(PublishError),
    /// WiFi never came back; the device must be hard-reset.
    RestartRequired { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub readings: Readings,
    pub outcome: CycleOutcome,
}

pub struct SensorNode<V, C, T, W, S, D> {
    voltage: V,
    current: C,
    temperature: TemperatureReader<T>,
    sampler: AnalogSampler,
    calibration: Calibration,
    publisher: TelemetryPublisher<W, S>,
    delay: D,
    cycles: u64,
}

impl<V, C, T, W, S, D> SensorNode<V, C, T, W, S, D>
where
    V: AnalogInput,
    C: AnalogInput,
    T: Thermocouple,
    W: WifiLink,
    S: TelemetrySink,
    D: DelayNs,
{
    pub fn new(
        config: &RuntimeConfig,
        channels: SensorChannels<V, C, T>,
        link: W,
        sink: S,
        delay: D,
    ) -> Self {
        Self {
            voltage: channels.voltage,
            current: channels.current,
            temperature: TemperatureReader::new(channels.thermocouple),
            sampler: AnalogSampler::new(&config.sampling),
            calibration: Calibration::new(config.calibration.clone()),
            publisher: TelemetryPublisher::new(
                link,
                sink,
                config.link.clone(),
                config.publish.fields,
            ),
            delay,
            cycles: 0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Samples with the radio off, then reconnects and publishes.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles = self.cycles.saturating_add(1);

        self.publisher.radio_off();
        let readings = self.sample();
        self.publisher.radio_on();

        info!(
            "cycle {}: voltage={} current={} temperature={:.2}°C{}",
            self.cycles,
            format_reading(readings.voltage_v, "V"),
            format_reading(readings.current_ma, "mA"),
            readings.temperature_c,
            if readings.temperature_valid { "" } else { " (invalid)" },
        );

        let link_attempts = match self.publisher.reconnect(&mut self.delay) {
            Ok(attempts) => attempts,
            Err(err) => {
                warn!("cycle {}: {err}; restart required", self.cycles);
                let attempts = match err {
                    LinkError::Exhausted { attempts } => attempts,
                    LinkError::Driver(_) => 0,
                };
                return CycleReport {
                    readings,
                    outcome: CycleOutcome::RestartRequired { attempts },
                };
            }
        };

        let outcome = match self.publisher.publish(&readings) {
            Ok(entry_id) => CycleOutcome::Published {
                entry_id,
                link_attempts,
            },
            Err(err) => {
                warn!("cycle {}: publish failed: {err}", self.cycles);
                CycleOutcome::PublishFailed(err)
            }
        };

        CycleReport { readings, outcome }
    }

    fn sample(&mut self) -> Readings {
        let voltage_v = match self.sampler.average(&mut self.voltage, &mut self.delay) {
            Ok(raw) => Some(self.calibration.volts(raw)),
            Err(err) => {
                warn!("voltage channel: {err}");
                None
            }
        };

        let current_ma = match self.sampler.average(&mut self.current, &mut self.delay) {
            Ok(raw) => Some(self.calibration.milliamps(raw)),
            Err(err) => {
                warn!("current channel: {err}");
                None
            }
        };

        let temperature = self.temperature.read();

        Readings {
            voltage_v,
            current_ma,
            temperature_c: temperature.celsius,
            temperature_valid: temperature.valid,
        }
    }
}

fn format_reading(value: Option<f32>, unit: &str) -> String {
    match value {
        Some(value) => format!("{value:.2}{unit}"),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::SensorError, telemetry::FieldUpdate};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        RadioDown,
        RadioUp,
        Connect,
        Adc(&'static str),
        Thermocouple,
        Write(String),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct LoggedAdc {
        name: &'static str,
        raw: Option<u16>,
        log: Log,
    }

    impl AnalogInput for LoggedAdc {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            self.log.borrow_mut().push(Event::Adc(self.name));
            self.raw.ok_or_else(|| SensorError::Adc("unwired".into()))
        }
    }

    struct LoggedThermocouple {
        celsius: f32,
        log: Log,
    }

    impl Thermocouple for LoggedThermocouple {
        fn read_celsius(&mut self) -> Result<f32, SensorError> {
            self.log.borrow_mut().push(Event::Thermocouple);
            Ok(self.celsius)
        }
    }

    struct LoggedLink {
        up: bool,
        connects: bool,
        log: Log,
    }

    impl WifiLink for LoggedLink {
        fn power_down(&mut self) -> Result<(), LinkError> {
            self.up = false;
            self.log.borrow_mut().push(Event::RadioDown);
            Ok(())
        }

        fn power_up(&mut self) -> Result<(), LinkError> {
            self.log.borrow_mut().push(Event::RadioUp);
            Ok(())
        }

        fn begin_connect(&mut self) -> Result<(), LinkError> {
            self.log.borrow_mut().push(Event::Connect);
            self.up = self.connects;
            Ok(())
        }

        fn is_connected(&mut self) -> bool {
            self.up
        }
    }

    struct LoggedSink {
        log: Log,
    }

    impl TelemetrySink for LoggedSink {
        fn write_fields(&mut self, update: &FieldUpdate) -> Result<Option<u32>, PublishError> {
            self.log
                .borrow_mut()
                .push(Event::Write(update.form_body("KEY")));
            Ok(Some(7))
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    type TestNode =
        SensorNode<LoggedAdc, LoggedAdc, LoggedThermocouple, LoggedLink, LoggedSink, NoDelay>;

    fn node(voltage_raw: Option<u16>, celsius: f32, connects: bool) -> (TestNode, Log) {
        let log: Log = Rc::default();
        let mut config = RuntimeConfig::default();
        config.sampling.samples_per_reading = 2;

        let node = SensorNode::new(
            &config,
            SensorChannels {
                voltage: LoggedAdc {
                    name: "voltage",
                    raw: voltage_raw,
                    log: log.clone(),
                },
                current: LoggedAdc {
                    name: "current",
                    raw: Some(2048),
                    log: log.clone(),
                },
                thermocouple: LoggedThermocouple {
                    celsius,
                    log: log.clone(),
                },
            },
            LoggedLink {
                up: true,
                connects,
                log: log.clone(),
            },
            LoggedSink { log: log.clone() },
            NoDelay,
        );
        (node, log)
    }

    #[test]
    fn samples_with_radio_off_then_publishes() {
        let (mut node, log) = node(Some(4095), 30.0, true);

        let report = node.run_cycle();

        assert_eq!(
            report.outcome,
            CycleOutcome::Published {
                entry_id: Some(7),
                link_attempts: 0,
            }
        );
        assert_eq!(
            *log.borrow(),
            vec![
                Event::RadioDown,
                Event::Adc("voltage"),
                Event::Adc("voltage"),
                Event::Adc("current"),
                Event::Adc("current"),
                Event::Thermocouple,
                Event::RadioUp,
                Event::Connect,
                Event::Write("api_key=KEY&field1=16.32&field2=2.18&field3=30.00".to_string()),
            ]
        );
        assert_eq!(node.cycles(), 1);
    }

    #[test]
    fn failed_channel_is_left_out() {
        let (mut node, log) = node(None, f32::NAN, true);

        let report = node.run_cycle();

        assert_eq!(report.readings.voltage_v, None);
        assert_eq!(report.readings.temperature_c, 0.0);
        assert!(!report.readings.temperature_valid);
        assert_eq!(
            log.borrow().last(),
            Some(&Event::Write(
                "api_key=KEY&field2=2.18&field3=0.00".to_string()
            ))
        );
    }

    #[test]
    fn lost_wifi_requires_restart_without_publishing() {
        let (mut node, log) = node(Some(1000), 20.0, false);

        let report = node.run_cycle();

        assert_eq!(
            report.outcome,
            CycleOutcome::RestartRequired { attempts: 20 }
        );
        assert!(!log
            .borrow()
            .iter()
            .any(|event| matches!(event, Event::Write(_))));
    }
}
