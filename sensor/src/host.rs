use std::{path::PathBuf, thread, time::Duration};

use anyhow::Context;
use embedded_hal::delay::DelayNs;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

use powermon_common::{
    channel_publish_topic, AnalogInput, CycleOutcome, FieldUpdate, LinkError, PublishError,
    RuntimeConfig, SensorChannels, SensorError, SensorNode, TelemetrySink, Thermocouple,
    WifiLink,
};

const SIM_CONNECT_POLLS: u32 = 2;
const SIM_OPEN_PROBE_EVERY: u32 = 12;

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Triangle wave of raw counts around a fixed centre.
struct SimulatedAdc {
    centre: u16,
    swing: u16,
    step: u16,
}

impl SimulatedAdc {
    fn new(centre: u16, swing: u16) -> Self {
        Self {
            centre,
            swing,
            step: 0,
        }
    }
}

impl AnalogInput for SimulatedAdc {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.step = (self.step + 1) % 16;
        let phase = i32::from(self.step) - 8;
        let offset = phase.abs() * i32::from(self.swing) / 8 - i32::from(self.swing) / 2;
        Ok((i32::from(self.centre) + offset).clamp(0, 4095) as u16)
    }
}

#[derive(Default)]
struct SimulatedThermocouple {
    reads: u32,
}

impl Thermocouple for SimulatedThermocouple {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        self.reads = self.reads.saturating_add(1);
        if self.reads % SIM_OPEN_PROBE_EVERY == 0 {
            return Ok(f32::NAN);
        }
        Ok(180.0 + (self.reads % 8) as f32 * 0.75)
    }
}

#[derive(Default)]
struct SimulatedWifi {
    powered: bool,
    associating: bool,
    polls: u32,
}

impl WifiLink for SimulatedWifi {
    fn power_down(&mut self) -> Result<(), LinkError> {
        self.powered = false;
        self.associating = false;
        self.polls = 0;
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), LinkError> {
        self.powered = true;
        Ok(())
    }

    fn begin_connect(&mut self) -> Result<(), LinkError> {
        if !self.powered {
            return Err(LinkError::Driver("radio is powered down".to_string()));
        }
        self.associating = true;
        self.polls = 0;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if !self.associating {
            return false;
        }
        self.polls = self.polls.saturating_add(1);
        self.polls > SIM_CONNECT_POLLS
    }
}

/// Publishes field updates to the channel's MQTT publish topic.
struct MqttFieldSink {
    client: AsyncClient,
    topic: String,
}

impl TelemetrySink for MqttFieldSink {
    fn write_fields(&mut self, update: &FieldUpdate) -> Result<Option<u32>, PublishError> {
        self.client
            .try_publish(
                self.topic.as_str(),
                QoS::AtLeastOnce,
                false,
                update.mqtt_payload(),
            )
            .map_err(|err| PublishError::Transport(err.to_string()))?;
        Ok(None)
    }
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut runtime = match std::env::var("POWERMON_CONFIG") {
        Ok(path) => {
            let path = PathBuf::from(path);
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            RuntimeConfig::from_json(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        Err(_) => RuntimeConfig::default(),
    };

    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.cloud.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.cloud.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.cloud.mqtt_user = user;
        runtime.cloud.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }
    if let Some(channel_id) = std::env::var("CLOUD_CHANNEL_ID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        runtime.cloud.channel_id = channel_id;
    }

    runtime.sanitize();
    Ok(runtime)
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config()?;

    let mut mqtt_options = MqttOptions::new(
        runtime.cloud.mqtt_client_id.as_str(),
        runtime.cloud.mqtt_host.as_str(),
        runtime.cloud.mqtt_port,
    );
    if !runtime.cloud.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.cloud.mqtt_user.as_str(),
            runtime.cloud.mqtt_pass.as_str(),
        );
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let topic = channel_publish_topic(runtime.cloud.channel_id);
    info!(
        "simulated sensor node publishing to `{topic}` on {}:{} every {} ms",
        runtime.cloud.mqtt_host, runtime.cloud.mqtt_port, runtime.publish.interval_ms
    );

    let mut node = SensorNode::new(
        &runtime,
        SensorChannels {
            voltage: SimulatedAdc::new(2_800, 40),
            current: SimulatedAdc::new(2_300, 120),
            thermocouple: SimulatedThermocouple::default(),
        },
        SimulatedWifi::default(),
        MqttFieldSink {
            client: mqtt,
            topic,
        },
        StdDelay,
    );

    let interval = Duration::from_millis(runtime.publish.interval_ms);

    loop {
        // Sampling and reconnect polling block on fixed delays.
        let report = tokio::task::block_in_place(|| node.run_cycle());

        if let Ok(readings) = serde_json::to_string(&report.readings) {
            debug!("cycle {} readings: {readings}", node.cycles());
        }

        if let CycleOutcome::RestartRequired { attempts } = report.outcome {
            anyhow::bail!("wifi did not reconnect after {attempts} attempts; restart required");
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    #[derive(Clone, Default)]
    struct CapturingSink(Rc<RefCell<Vec<String>>>);

    impl TelemetrySink for CapturingSink {
        fn write_fields(&mut self, update: &FieldUpdate) -> Result<Option<u32>, PublishError> {
            self.0.borrow_mut().push(update.mqtt_payload());
            Ok(None)
        }
    }

    #[test]
    fn simulated_adc_stays_around_centre() {
        let mut adc = SimulatedAdc::new(2_000, 100);
        for _ in 0..64 {
            let raw = adc.read_raw().unwrap();
            assert!((1_950..=2_050).contains(&raw), "raw {raw} out of band");
        }
    }

    #[test]
    fn simulated_wifi_needs_power_to_connect() {
        let mut wifi = SimulatedWifi::default();
        assert!(wifi.begin_connect().is_err());

        wifi.power_up().unwrap();
        wifi.begin_connect().unwrap();
        assert!(!wifi.is_connected());
        assert!(!wifi.is_connected());
        assert!(wifi.is_connected());

        wifi.power_down().unwrap();
        assert!(!wifi.is_connected());
    }

    #[test]
    fn simulated_node_publishes_every_cycle() {
        let runtime = RuntimeConfig::default();
        let sink = CapturingSink::default();
        let mut node = SensorNode::new(
            &runtime,
            SensorChannels {
                voltage: SimulatedAdc::new(2_800, 40),
                current: SimulatedAdc::new(2_300, 120),
                thermocouple: SimulatedThermocouple::default(),
            },
            SimulatedWifi::default(),
            sink.clone(),
            NoDelay,
        );

        let mut last = None;
        for cycle in 0..SIM_OPEN_PROBE_EVERY {
            let report = node.run_cycle();
            assert_eq!(
                report.outcome,
                CycleOutcome::Published {
                    entry_id: None,
                    link_attempts: SIM_CONNECT_POLLS,
                }
            );
            if cycle == 0 {
                let volts = report.readings.voltage_v.unwrap();
                assert!((11.0..12.0).contains(&volts), "volts {volts}");
            }
            last = Some(report.readings);
        }

        let last = last.unwrap();
        assert_eq!(last.temperature_c, 0.0);
        assert!(!last.temperature_valid);

        let payloads = sink.0.borrow();
        assert_eq!(payloads.len(), SIM_OPEN_PROBE_EVERY as usize);
        assert!(payloads
            .last()
            .unwrap()
            .ends_with("&field3=0.00&status=MQTTPUBLISH"));
    }
}
