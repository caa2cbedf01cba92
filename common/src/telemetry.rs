use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::{
    config::{FieldMap, LinkPolicy, MAX_FIELD_NUMBER},
    error::{LinkError, PublishError},
    topics::MQTT_STATUS_FIELD,
    types::Readings,
};

/// Station-mode radio control.
pub trait WifiLink {
    fn power_down(&mut self) -> Result<(), LinkError>;
    fn power_up(&mut self) -> Result<(), LinkError>;
    /// Starts association without waiting for it to finish.
    fn begin_connect(&mut self) -> Result<(), LinkError>;
    fn is_connected(&mut self) -> bool;
}

/// Cloud endpoint accepting numbered field writes.
pub trait TelemetrySink {
    /// Returns the endpoint's entry id when it reports one.
    fn write_fields(&mut self, update: &FieldUpdate) -> Result<Option<u32>, PublishError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    fields: Vec<(u8, f32)>,
}

impl FieldUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_readings(readings: &Readings, map: &FieldMap) -> Self {
        let mut update = Self::new();
        if let Some(volts) = readings.voltage_v {
            update.set(map.voltage, volts);
        }
        if let Some(milliamps) = readings.current_ma {
            update.set(map.current, milliamps);
        }
        update.set(map.temperature, readings.temperature_c);
        update
    }

    /// Sets `field` (1..=8), replacing any earlier value. Returns false when rejected.
    pub fn set(&mut self, field: u8, value: f32) -> bool {
        if field == 0 || field > MAX_FIELD_NUMBER {
            warn!("field{field} is outside 1..={MAX_FIELD_NUMBER}; dropped");
            return false;
        }
        if !value.is_finite() {
            warn!("field{field} value {value} is not finite; dropped");
            return false;
        }

        match self.fields.iter_mut().find(|(number, _)| *number == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn get(&self, field: u8) -> Option<f32> {
        self.fields
            .iter()
            .find(|(number, _)| *number == field)
            .map(|(_, value)| *value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    fn encoded_fields(&self) -> impl Iterator<Item = String> + '_ {
        self.fields
            .iter()
            .map(|(number, value)| format!("field{number}={value:.2}"))
    }

    /// `application/x-www-form-urlencoded` body for the HTTP update endpoint.
    pub fn form_body(&self, api_key: &str) -> String {
        std::iter::once(format!("api_key={}", form_encode(api_key)))
            .chain(self.encoded_fields())
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Payload for the `channels/<id>/publish` MQTT topic.
    pub fn mqtt_payload(&self) -> String {
        self.encoded_fields()
            .chain(std::iter::once(MQTT_STATUS_FIELD.to_string()))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Percent-encodes everything outside the URL unreserved set.
fn form_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(char::from(byte))
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Interprets the HTTP update endpoint's reply. The body is the new entry id; `0` means
/// the write was dropped (usually the channel rate limit).
pub fn parse_update_response(status: u16, body: &str) -> Result<u32, PublishError> {
    if status != 200 {
        return Err(PublishError::Status(status));
    }

    let body = body.trim();
    match body.parse::<u32>() {
        Ok(0) => Err(PublishError::Rejected),
        Ok(entry_id) => Ok(entry_id),
        Err(_) => Err(PublishError::BadResponse(body.chars().take(32).collect())),
    }
}

pub struct TelemetryPublisher<W, S> {
    link: W,
    sink: S,
    policy: LinkPolicy,
    fields: FieldMap,
}

impl<W: WifiLink, S: TelemetrySink> TelemetryPublisher<W, S> {
    pub fn new(link: W, sink: S, mut policy: LinkPolicy, fields: FieldMap) -> Self {
        policy.sanitize();
        Self {
            link,
            sink,
            policy,
            fields,
        }
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &W {
        &self.link
    }

    #[cfg(test)]
    pub(crate) fn sink(&self) -> &S {
        &self.sink
    }

    pub fn radio_off(&mut self) {
        match self.link.power_down() {
            Ok(()) => debug!("wifi radio off for sampling"),
            Err(err) => warn!("failed to power down wifi: {err}"),
        }
    }

    pub fn radio_on(&mut self) {
        match self.link.power_up() {
            Ok(()) => debug!("wifi radio on"),
            Err(err) => warn!("failed to power up wifi: {err}"),
        }
    }

    /// Waits for the station to associate. Returns the number of polls it took.
    pub fn reconnect<D: DelayNs + ?Sized>(&mut self, delay: &mut D) -> Result<u32, LinkError> {
        if self.link.is_connected() {
            return Ok(0);
        }

        if let Err(err) = self.link.begin_connect() {
            warn!("wifi connect request failed: {err}");
        }

        let mut attempts = 0;
        while !self.link.is_connected() && attempts < self.policy.reconnect_attempts {
            delay.delay_ms(self.policy.retry_delay_ms);
            attempts += 1;
        }

        if self.link.is_connected() {
            info!("wifi connected after {attempts} poll(s)");
            Ok(attempts)
        } else {
            warn!(
                "wifi still disconnected after {attempts} polls of {} ms",
                self.policy.retry_delay_ms
            );
            Err(LinkError::Exhausted { attempts })
        }
    }

    pub fn publish(&mut self, readings: &Readings) -> Result<Option<u32>, PublishError> {
        let update = FieldUpdate::from_readings(readings, &self.fields);
        if update.is_empty() {
            return Err(PublishError::Empty);
        }

        let entry = self.sink.write_fields(&update)?;
        match entry {
            Some(entry_id) => info!("published {} field(s) as entry {entry_id}", update.len()),
            None => info!("published {} field(s)", update.len()),
        }
        Ok(entry)
    }
}
