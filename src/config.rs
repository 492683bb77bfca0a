// config.rs

use std::{fmt, ops::RangeInclusive, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Written into the first word of the config region on every save.
pub const PRESENCE_MARKER: u32 = 0x00C0_FFEE;

pub const DEFAULT_HOSTNAME: &str = match option_env!("AP_HOSTNAME") {
    Some(h) => h,
    None => "ESP-Thermometer",
};

const DEFAULT_API_PORT: u16 = 80;
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_PUBLISH_INTERVAL: u16 = 10;
pub const MIN_PUBLISH_INTERVAL: u16 = 2;
pub const TEMP_CORRECTION_RANGE: RangeInclusive<i8> = -10..=10;

pub const CREDENTIAL_LEN: usize = 31;
pub const BROKER_ADDR_LEN: usize = 15;
pub const TOPIC_LEN: usize = 254;

pub type Credential = heapless::String<CREDENTIAL_LEN>;
pub type BrokerAddr = heapless::String<BROKER_ADDR_LEN>;
pub type Topic = heapless::String<TOPIC_LEN>;

pub fn api_port() -> u16 {
    option_env!("API_PORT")
        .unwrap_or("-")
        .parse()
        .unwrap_or(DEFAULT_API_PORT)
}

/// Copies `src` into `dst` up to its capacity, never splitting a character.
///
/// If `src` does not fit, `dst` holds the longest prefix that does and
/// `ConfigError::Truncated` is returned so the caller can refuse to persist it.
pub fn bounded_copy<const N: usize>(
    dst: &mut heapless::String<N>,
    src: &str,
    field: &'static str,
) -> Result<(), ConfigError> {
    dst.clear();
    for c in src.chars() {
        if dst.push(c).is_err() {
            return Err(ConfigError::Truncated {
                field,
                max: N,
                len: src.len(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    #[serde(skip)]
    marker: u32,

    wifi_ssid: Credential,
    wifi_passphrase: Credential,
    hostname: Credential,

    broker_address: BrokerAddr,
    broker_port: u16,
    broker_username: Credential,
    broker_password: Credential,
    publish_topic: Topic,

    temperature_correction: i8,
    publish_interval_secs: u16,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            broker_port: DEFAULT_BROKER_PORT,
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL,
            ..Self::blank()
        }
    }
}

impl ConfigRecord {
    /// All-zero record, as read back from erased storage.
    pub fn blank() -> Self {
        Self {
            marker: 0,
            wifi_ssid: Credential::new(),
            wifi_passphrase: Credential::new(),
            hostname: Credential::new(),
            broker_address: BrokerAddr::new(),
            broker_port: 0,
            broker_username: Credential::new(),
            broker_password: Credential::new(),
            publish_topic: Topic::new(),
            temperature_correction: 0,
            publish_interval_secs: 0,
        }
    }

    /// Builds a fresh candidate from portal input. Empty numeric fields take
    /// their defaults; any rejected field aborts the whole candidate.
    pub fn from_form(form: &ConfigForm) -> Result<Self, ConfigError> {
        let mut c = Self::default();
        c.set_wifi_ssid(&form.wifi_ssid)?;
        c.set_wifi_passphrase(&form.wifi_passwd)?;
        c.set_hostname(&form.host)?;
        c.set_broker_address(&form.broker_ip)?;
        c.set_broker_port(parse_field(
            "mqtt-port",
            &form.mqtt_port,
            DEFAULT_BROKER_PORT,
        )?);
        c.set_broker_username(&form.mqtt_user)?;
        c.set_broker_password(&form.mqtt_passwd)?;
        c.set_publish_topic(&form.mqtt_topic)?;
        c.set_temperature_correction(parse_field("temp-correction", &form.temp_correction, 0)?)?;
        c.set_publish_interval_secs(parse_field(
            "mqtt-delay",
            &form.mqtt_delay,
            DEFAULT_PUBLISH_INTERVAL,
        )?)?;
        Ok(c)
    }

    pub fn marker(&self) -> u32 {
        self.marker
    }

    pub(crate) fn set_marker(&mut self, marker: u32) {
        self.marker = marker;
    }

    pub fn is_present(&self) -> bool {
        self.marker == PRESENCE_MARKER
    }

    /// Checks that every required text field is filled in.
    pub fn check_required(&self) -> Result<(), ConfigError> {
        let required = [
            ("wifi-ssid", self.wifi_ssid.is_empty()),
            ("wifi-passwd", self.wifi_passphrase.is_empty()),
            ("host", self.hostname.is_empty()),
            ("broker-ip", self.broker_address.is_empty()),
            ("mqtt-user", self.broker_username.is_empty()),
            ("mqtt-passwd", self.broker_password.is_empty()),
            ("mqtt-topic", self.publish_topic.is_empty()),
        ];
        match required.iter().find(|(_, empty)| *empty) {
            Some(&(field, _)) => Err(ConfigError::Missing { field }),
            None => Ok(()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_required()?;
        if !self.is_present() {
            return Err(ConfigError::NotPresent);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn wifi_ssid(&self) -> &str {
        &self.wifi_ssid
    }

    pub fn wifi_passphrase(&self) -> &str {
        &self.wifi_passphrase
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn broker_address(&self) -> &str {
        &self.broker_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn broker_username(&self) -> &str {
        &self.broker_username
    }

    pub fn broker_password(&self) -> &str {
        &self.broker_password
    }

    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }

    pub fn temperature_correction(&self) -> i8 {
        self.temperature_correction
    }

    pub fn publish_interval_secs(&self) -> u16 {
        self.publish_interval_secs
    }

    pub fn set_wifi_ssid(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.wifi_ssid, v, "wifi-ssid")
    }

    pub fn set_wifi_passphrase(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.wifi_passphrase, v, "wifi-passwd")
    }

    pub fn set_hostname(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.hostname, v, "host")
    }

    pub fn set_broker_address(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.broker_address, v, "broker-ip")
    }

    pub fn set_broker_port(&mut self, port: u16) {
        self.broker_port = port;
    }

    pub fn set_broker_username(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.broker_username, v, "mqtt-user")
    }

    pub fn set_broker_password(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.broker_password, v, "mqtt-passwd")
    }

    pub fn set_publish_topic(&mut self, v: &str) -> Result<(), ConfigError> {
        bounded_copy(&mut self.publish_topic, v, "mqtt-topic")
    }

    pub fn set_temperature_correction(&mut self, v: i8) -> Result<(), ConfigError> {
        if !TEMP_CORRECTION_RANGE.contains(&v) {
            return Err(ConfigError::OutOfRange {
                field: "temp-correction",
                value: v.into(),
                min: (*TEMP_CORRECTION_RANGE.start()).into(),
                max: (*TEMP_CORRECTION_RANGE.end()).into(),
            });
        }
        self.temperature_correction = v;
        Ok(())
    }

    pub fn set_publish_interval_secs(&mut self, v: u16) -> Result<(), ConfigError> {
        if v < MIN_PUBLISH_INTERVAL {
            return Err(ConfigError::OutOfRange {
                field: "mqtt-delay",
                value: v.into(),
                min: MIN_PUBLISH_INTERVAL.into(),
                max: u16::MAX.into(),
            });
        }
        self.publish_interval_secs = v;
        Ok(())
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            valid: self.is_valid(),
            wifi_ssid: self.wifi_ssid().to_string(),
            hostname: self.hostname().to_string(),
            broker_address: self.broker_address().to_string(),
            broker_port: self.broker_port,
            broker_username: self.broker_username().to_string(),
            publish_topic: self.publish_topic().to_string(),
            temperature_correction: self.temperature_correction,
            publish_interval_secs: self.publish_interval_secs,
        }
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "********"
    }
}

impl fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("marker", &format_args!("{:#x}", self.marker))
            .field("wifi_ssid", &self.wifi_ssid())
            .field("wifi_passphrase", &mask(&self.wifi_passphrase))
            .field("hostname", &self.hostname())
            .field("broker_address", &self.broker_address())
            .field("broker_port", &self.broker_port)
            .field("broker_username", &self.broker_username())
            .field("broker_password", &mask(&self.broker_password))
            .field("publish_topic", &self.publish_topic())
            .field("temperature_correction", &self.temperature_correction)
            .field("publish_interval_secs", &self.publish_interval_secs)
            .finish()
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str, default: T) -> Result<T, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(default);
    }
    value.parse().map_err(|_| ConfigError::Parse {
        field,
        value: value.to_string(),
    })
}

/// Fields posted by the configuration portal form.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigForm {
    #[serde(rename = "wifi-ssid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifi-passwd")]
    pub wifi_passwd: String,
    pub host: String,
    #[serde(rename = "broker-ip")]
    pub broker_ip: String,
    #[serde(rename = "mqtt-port")]
    pub mqtt_port: String,
    #[serde(rename = "mqtt-user")]
    pub mqtt_user: String,
    #[serde(rename = "mqtt-passwd")]
    pub mqtt_passwd: String,
    #[serde(rename = "mqtt-topic")]
    pub mqtt_topic: String,
    #[serde(rename = "temp-correction")]
    pub temp_correction: String,
    #[serde(rename = "mqtt-delay")]
    pub mqtt_delay: String,
}

/// Config as shown by the API, without secrets.
#[derive(Clone, Debug, Serialize)]
pub struct ConfigView {
    pub valid: bool,
    pub wifi_ssid: String,
    pub hostname: String,
    pub broker_address: String,
    pub broker_port: u16,
    pub broker_username: String,
    pub publish_topic: String,
    pub temperature_correction: i8,
    pub publish_interval_secs: u16,
}


// EOF
