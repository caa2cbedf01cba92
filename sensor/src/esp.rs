use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC2,
    },
    delay::FreeRtos,
    gpio::ADCPin,
    reset::restart,
    spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriver, SpiDriverConfig},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::EspError,
    wifi::EspWifi,
};
use log::{info, warn};

use powermon_common::{
    config::NetworkConfig, parse_update_response, resolve_stored, AnalogInput, CycleOutcome,
    FieldUpdate, LinkError, Max6675, PublishError, RuntimeConfig, SensorChannels, SensorError,
    SensorNode, TelemetrySink, WifiLink,
};

const NVS_NAMESPACE: &str = "powermon";
const NVS_RUNTIME_KEY: &str = "runtime_json";

// ADC2 pins; ADC2 is unusable while the WiFi radio is running.
const VOLTAGE_GPIO: i32 = 25;
const CURRENT_GPIO: i32 = 26;
const THERMO_SCK_GPIO: i32 = 18;
const THERMO_SO_GPIO: i32 = 19;
const THERMO_CS_GPIO: i32 = 5;

const MAX_RESPONSE_BODY: usize = 64;
const HTTP_TIMEOUT_SEC: u64 = 30;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;

type Adc2Driver = AdcDriver<'static, ADC2>;
type ThermocoupleSpi = SpiDeviceDriver<'static, SpiDriver<'static>>;

struct EspAnalogPin<T>
where
    T: ADCPin<Adc = ADC2> + 'static,
{
    channel: AdcChannelDriver<'static, T, &'static Adc2Driver>,
    gpio: i32,
}

impl<T> EspAnalogPin<T>
where
    T: ADCPin<Adc = ADC2> + 'static,
{
    fn new(
        adc: &'static Adc2Driver,
        pin: T,
        gpio: i32,
        config: &AdcChannelConfig,
    ) -> anyhow::Result<Self> {
        let channel = AdcChannelDriver::new(adc, pin, config)
            .with_context(|| format!("failed to configure ADC channel on GPIO{gpio}"))?;
        Ok(Self { channel, gpio })
    }
}

impl<T> AnalogInput for EspAnalogPin<T>
where
    T: ADCPin<Adc = ADC2> + 'static,
{
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.channel
            .read()
            .map_err(|err| SensorError::Adc(format!("GPIO{}: {err}", self.gpio)))
    }
}

struct EspRadio {
    wifi: EspWifi<'static>,
}

fn link_error(err: EspError) -> LinkError {
    LinkError::Driver(err.to_string())
}

impl WifiLink for EspRadio {
    fn power_down(&mut self) -> Result<(), LinkError> {
        if !self.wifi.is_started().map_err(link_error)? {
            return Ok(());
        }
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect before power down failed: {err}");
        }
        self.wifi.stop().map_err(link_error)
    }

    fn power_up(&mut self) -> Result<(), LinkError> {
        if self.wifi.is_started().map_err(link_error)? {
            return Ok(());
        }
        self.wifi.start().map_err(link_error)
    }

    fn begin_connect(&mut self) -> Result<(), LinkError> {
        self.wifi.connect().map_err(link_error)
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }
}

/// Writes fields through the HTTP update endpoint. A fresh connection is opened per
/// write since the radio is power-cycled between cycles.
struct HttpFieldSink {
    endpoint_url: String,
    api_key: String,
}

impl HttpFieldSink {
    fn post(&self, body: &str) -> anyhow::Result<(u16, String)> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(Duration::from_secs(HTTP_TIMEOUT_SEC)),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);

        let content_length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/x-www-form-urlencoded"),
            ("Content-Length", content_length.as_str()),
        ];
        let mut request = client.request(Method::Post, &self.endpoint_url, &headers)?;
        request
            .write_all(body.as_bytes())
            .map_err(|e| anyhow!("{e:?}"))?;
        request.flush().map_err(|e| anyhow!("{e:?}"))?;
        let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

        let status = response.status();
        let mut buf = [0_u8; MAX_RESPONSE_BODY];
        let mut len = 0;
        while len < buf.len() {
            let read = response.read(&mut buf[len..]).map_err(|e| anyhow!("{e:?}"))?;
            if read == 0 {
                break;
            }
            len += read;
        }

        Ok((status, String::from_utf8_lossy(&buf[..len]).into_owned()))
    }
}

impl TelemetrySink for HttpFieldSink {
    fn write_fields(&mut self, update: &FieldUpdate) -> Result<Option<u32>, PublishError> {
        let (status, body) = self
            .post(&update.form_body(&self.api_key))
            .map_err(|err| PublishError::Transport(format!("{err:#}")))?;
        parse_update_response(status, &body).map(Some)
    }
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<Option<RuntimeConfig>> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(Some(RuntimeConfig::from_json(value)?)),
            None => Ok(None),
        }
    }

    fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        nvs.set_str(NVS_RUNTIME_KEY, &runtime.to_json()?)?;
        Ok(())
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let (mut runtime, source) =
        resolve_stored(nvs_store.load_runtime_config().map_err(|err| format!("{err:#}")));

    apply_build_defaults(&mut runtime);
    runtime.sanitize();

    if source.should_persist() {
        match nvs_store.save_runtime_config(&runtime) {
            Ok(()) => info!("stored initial runtime config in NVS"),
            Err(err) => warn!("failed to store runtime config in NVS: {err:#}"),
        }
    }

    let Peripherals {
        modem,
        pins,
        adc2,
        spi2,
        ..
    } = Peripherals::take()?;

    let adc: &'static Adc2Driver = Box::leak(Box::new(
        AdcDriver::new(adc2).context("failed to initialize ADC2")?,
    ));
    let channel_config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };
    let voltage = EspAnalogPin::new(adc, pins.gpio25, VOLTAGE_GPIO, &channel_config)?;
    let current = EspAnalogPin::new(adc, pins.gpio26, CURRENT_GPIO, &channel_config)?;

    let spi_driver = SpiDriver::new(
        spi2,
        pins.gpio18,
        pins.gpio23,
        Some(pins.gpio19),
        &SpiDriverConfig::new(),
    )
    .context("failed to initialize thermocouple SPI bus")?;
    let spi: ThermocoupleSpi = SpiDeviceDriver::new(
        spi_driver,
        Some(pins.gpio5),
        &SpiConfig::new().baudrate(1.MHz().into()),
    )?;
    info!(
        "MAX6675 on SCK=GPIO{THERMO_SCK_GPIO} SO=GPIO{THERMO_SO_GPIO} CS=GPIO{THERMO_CS_GPIO}"
    );

    if !runtime.network.has_station_credentials() {
        warn!("wifi credentials missing; build with WIFI_SSID/WIFI_PASS or store them in NVS");
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    if runtime.cloud.api_key.is_empty() {
        warn!("cloud api key missing; the endpoint will refuse updates");
    }

    let wifi = create_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let mut node = SensorNode::new(
        &runtime,
        SensorChannels {
            voltage,
            current,
            thermocouple: Max6675::new(spi),
        },
        EspRadio { wifi },
        HttpFieldSink {
            endpoint_url: runtime.cloud.endpoint_url.clone(),
            api_key: runtime.cloud.api_key.clone(),
        },
        FreeRtos,
    );

    info!(
        "sensor node started; publishing every {} ms",
        runtime.publish.interval_ms
    );

    loop {
        feed_watchdog();

        let report = node.run_cycle();
        if let CycleOutcome::RestartRequired { attempts } = report.outcome {
            warn!("wifi did not reconnect after {attempts} attempts; restarting device for recovery");
            thread::sleep(Duration::from_millis(100));
            restart();
        }

        sleep_feeding_watchdog(Duration::from_millis(runtime.publish.interval_ms));
    }
}

fn apply_build_defaults(runtime: &mut RuntimeConfig) {
    if !runtime.network.has_station_credentials() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }

    if runtime.cloud.api_key.is_empty() {
        runtime.cloud.api_key = option_env!("CLOUD_API_KEY").unwrap_or_default().to_string();
    }

    if runtime.cloud.channel_id == 0 {
        if let Some(channel_id) =
            option_env!("CLOUD_CHANNEL_ID").and_then(|value| value.parse::<u32>().ok())
        {
            runtime.cloud.channel_id = channel_id;
        }
    }
}

fn create_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    info!("wifi configured for `{}`", network.wifi_ssid);
    Ok(wifi)
}

fn sleep_feeding_watchdog(duration: Duration) {
    let mut remaining = duration;
    while !remaining.is_zero() {
        let step = remaining.min(Duration::from_secs(1));
        thread::sleep(step);
        feed_watchdog();
        remaining -= step;
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}
