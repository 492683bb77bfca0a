// esp.rs

use std::{sync::atomic::AtomicBool, time::Instant};

use anyhow::anyhow;
use dht_sensor::dht11;
use embedded_svc::{
    mqtt::client::QoS,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    mdns::EspMdns,
    mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration},
    nvs::{EspNvs, NvsDefault},
    wifi::EspWifi,
};
use log::*;

use crate::*;

const CONFIG_NAME: &str = "cfg";

// One DHT11 conversion feeds both the humidity and the temperature read.
const DHT_CACHE: Duration = Duration::from_millis(1500);

pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    pub fn new(nvs: EspNvs<NvsDefault>) -> Self {
        Self { nvs }
    }
}

impl Storage for NvsStorage {
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        match self.nvs.get_raw(CONFIG_NAME, buf)? {
            Some(b) => Ok(b.len()),
            None => {
                info!("Nvs key not found");
                Ok(0)
            }
        }
    }

    fn write_region(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.nvs.set_raw(CONFIG_NAME, data)?;
        Ok(())
    }
}

/// The radio in AP, station or mixed mode. Configuration is only pushed to
/// the driver when it changes, so station retries leave the softAP running.
pub struct EspWifiPort {
    wifi: EspWifi<'static>,
    ap: Option<AccessPointConfiguration>,
    client: Option<ClientConfiguration>,
    applied: LastApplied<Configuration>,
    hostname: LastApplied<Credential>,
    mdns: Option<EspMdns>,
    announced: LastApplied<Credential>,
}

impl EspWifiPort {
    pub fn new(wifi: EspWifi<'static>) -> Self {
        Self {
            wifi,
            ap: None,
            client: None,
            applied: LastApplied::default(),
            hostname: LastApplied::default(),
            mdns: None,
            announced: LastApplied::default(),
        }
    }

    fn apply(&mut self) -> anyhow::Result<()> {
        let conf = match (self.client.clone(), self.ap.clone()) {
            (Some(c), Some(a)) => Configuration::Mixed(c, a),
            (Some(c), None) => Configuration::Client(c),
            (None, Some(a)) => Configuration::AccessPoint(a),
            (None, None) => Configuration::None,
        };
        let wifi = &mut self.wifi;
        if self.applied.apply(conf, |c| wifi.set_configuration(c))? {
            info!("WiFi configuration updated.");
        }
        if !self.wifi.is_started()? {
            info!("WiFi driver starting...");
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl WifiPort for EspWifiPort {
    fn start_access_point(&mut self, ssid: &str) -> anyhow::Result<()> {
        self.ap = Some(AccessPointConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| anyhow!("access point name too long"))?,
            auth_method: AuthMethod::None,
            channel: 1,
            ..Default::default()
        });
        self.apply()
    }

    fn stop_access_point(&mut self) -> anyhow::Result<()> {
        self.ap = None;
        self.apply()
    }

    fn begin_station(&mut self, creds: &StationCredentials) -> anyhow::Result<()> {
        self.client = Some(ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("ssid too long"))?,
            password: creds
                .passphrase
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("passphrase too long"))?,
            auth_method: if creds.passphrase.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        self.apply()?;
        let netif = self.wifi.sta_netif_mut();
        self.hostname
            .apply(creds.hostname.clone(), |h| netif.set_hostname(h.as_str()))?;
        self.wifi.connect()?;
        Ok(())
    }

    fn station_up(&mut self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn announce(&mut self, hostname: &str) -> anyhow::Result<()> {
        if self.mdns.is_none() {
            self.mdns = Some(EspMdns::take()?);
        }
        let Some(mdns) = self.mdns.as_mut() else {
            bail!("mDNS unavailable");
        };
        let name: Credential = hostname
            .try_into()
            .map_err(|_| anyhow!("hostname too long"))?;
        // the service record survives reconnects, register it once
        let fresh = self.announced.apply(name, |h| -> anyhow::Result<()> {
            mdns.set_hostname(h.as_str())?;
            mdns.add_service(None, "_http", "_tcp", api_port(), &[])?;
            Ok(())
        })?;
        if fresh {
            info!("mDNS: {hostname}.local");
        }
        Ok(())
    }
}

/// MQTT client, recreated on every connect. The connected flag follows the
/// client's own events.
pub struct EspBroker {
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl EspBroker {
    pub fn new() -> Self {
        Self {
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for EspBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerTransport for EspBroker {
    fn connect(&mut self, opts: &BrokerOptions) -> anyhow::Result<()> {
        self.client = None;
        self.connected.store(false, Ordering::Relaxed);

        let flag = self.connected.clone();
        let conf = MqttClientConfiguration {
            client_id: Some(&opts.client_id),
            username: Some(&opts.username),
            password: Some(&opts.password),
            keep_alive_interval: Some(Duration::from_secs(25)),
            ..Default::default()
        };
        let client = EspMqttClient::new_cb(&opts.url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => flag.store(true, Ordering::Relaxed),
            EventPayload::Disconnected => flag.store(false, Ordering::Relaxed),
            EventPayload::Error(e) => warn!("MQTT error: {e:?}"),
            _ => {}
        })?;
        self.client = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::Relaxed)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        let Some(client) = self.client.as_mut() else {
            return Err(PublishError::Disconnected);
        };
        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .map(|_| ())
            .map_err(|e| PublishError::Transport(format!("{e:?}")))
    }
}

pub struct DhtSensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    last: Option<(Instant, f32, f32)>,
}

impl DhtSensor {
    pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self {
            pin,
            delay: Ets,
            last: None,
        })
    }

    fn measure(&mut self) -> Option<(f32, f32)> {
        if let Some((at, t, h)) = self.last {
            if at.elapsed() < DHT_CACHE {
                return Some((t, h));
            }
        }

        if let Err(e) = self.pin.set_high() {
            warn!("DHT11 line stuck: {e:?}");
            return None;
        }
        match dht11::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(r) => {
                let (t, h) = (f32::from(r.temperature), f32::from(r.relative_humidity));
                info!("DHT11: {t:.1}C {h:.1}%");
                self.last = Some((Instant::now(), t, h));
                Some((t, h))
            }
            Err(e) => {
                warn!("DHT11 read failed: {e:?}");
                self.last = None;
                None
            }
        }
    }
}

impl Sensor for DhtSensor {
    fn read_temperature(&mut self) -> Option<f32> {
        self.measure().map(|(t, _)| t)
    }

    fn read_humidity(&mut self) -> Option<f32> {
        self.measure().map(|(_, h)| h)
    }
}

// EOF
