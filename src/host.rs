// host.rs
//
// Stand-ins for the radio, the broker client and the sensor so the firmware
// logic and the portal can run on a development machine.

use std::{fs, io::ErrorKind, path::PathBuf};

use anyhow::Context;
use log::*;

use crate::*;

/// Config region kept in a plain file. A missing file reads as erased.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Storage for FileStorage {
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write_region(&mut self, data: &[u8]) -> anyhow::Result<()> {
        fs::write(&self.path, data).with_context(|| format!("writing {}", self.path.display()))
    }
}

/// Joins any network `join_after` polls after the attempt was issued.
#[derive(Debug, Default)]
pub struct SimWifi {
    join_after: u32,
    pending: Option<u32>,
    up: bool,
}

impl SimWifi {
    pub fn new(join_after: u32) -> Self {
        Self {
            join_after,
            ..Default::default()
        }
    }
}

impl WifiPort for SimWifi {
    fn start_access_point(&mut self, ssid: &str) -> anyhow::Result<()> {
        info!("[sim] access point {ssid:?} up");
        Ok(())
    }

    fn stop_access_point(&mut self) -> anyhow::Result<()> {
        info!("[sim] access point down");
        Ok(())
    }

    fn begin_station(&mut self, creds: &StationCredentials) -> anyhow::Result<()> {
        info!("[sim] joining {:?}", creds.ssid.as_str());
        if !self.up && self.pending.is_none() {
            self.pending = Some(self.join_after);
        }
        Ok(())
    }

    fn station_up(&mut self) -> bool {
        match self.pending {
            Some(0) => {
                self.pending = None;
                self.up = true;
            }
            Some(n) => self.pending = Some(n - 1),
            None => {}
        }
        self.up
    }

    fn announce(&mut self, hostname: &str) -> anyhow::Result<()> {
        info!("[sim] mDNS {hostname}.local");
        Ok(())
    }
}

/// Accepts every connection and logs what would go on the wire.
#[derive(Debug, Default)]
pub struct SimBroker {
    connected: bool,
}

impl BrokerTransport for SimBroker {
    fn connect(&mut self, opts: &BrokerOptions) -> anyhow::Result<()> {
        info!("[sim] broker session to {} as {}", opts.url, opts.client_id);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        info!(
            "[sim] {topic} (retain={retain}): {}",
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }
}

/// Synthetic readings that drift a little on every measurement.
#[derive(Debug, Default)]
pub struct SimSensor {
    tick: u64,
}

impl Sensor for SimSensor {
    fn read_temperature(&mut self) -> Option<f32> {
        Some(20.0 + (self.tick % 8) as f32 * 0.25)
    }

    fn read_humidity(&mut self) -> Option<f32> {
        self.tick = self.tick.wrapping_add(1);
        Some(42.0 + (self.tick % 6) as f32 * 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("esp32thermo-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_file_loads_blank() {
        let path = temp_path("missing");
        let _ = fs::remove_file(&path);
        let mut store = ConfigStore::new(FileStorage::new(&path));
        assert!(!store.load().is_valid());
    }

    #[test]
    fn file_storage_survives_reopen() {
        let path = temp_path("reopen");
        let mut record = ConfigRecord::default();
        record.set_wifi_ssid("homenet").unwrap();
        record.set_wifi_passphrase("hunter22").unwrap();
        record.set_hostname("porch").unwrap();
        record.set_broker_address("10.0.0.2").unwrap();
        record.set_broker_username("sensor").unwrap();
        record.set_broker_password("s3cret").unwrap();
        record.set_publish_topic("home/porch").unwrap();

        ConfigStore::new(FileStorage::new(&path))
            .save(&mut record)
            .unwrap();
        let loaded = ConfigStore::new(FileStorage::new(&path)).load();
        let _ = fs::remove_file(&path);

        assert!(loaded.is_valid());
        assert_eq!(loaded, record);
    }

    #[test]
    fn sim_wifi_joins_after_delay() {
        let mut wifi = SimWifi::new(2);
        assert!(!wifi.station_up());
        let creds = StationCredentials::from_record(&ConfigRecord::default());
        wifi.begin_station(&creds).unwrap();
        assert!(!wifi.station_up());
        assert!(!wifi.station_up());
        assert!(wifi.station_up());
    }
}

// EOF
