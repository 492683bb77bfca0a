// storage.rs

use anyhow::bail;
use crc::{Crc, CRC_32_ISCSI};
use log::*;

use crate::*;

/// Size of the reserved config region, written and erased as one block.
pub const REGION_SIZE: usize = 512;

// marker (u32 LE) + payload length (u16 LE)
const HEADER_SIZE: usize = 6;

static CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Byte-addressable backing store for the config region.
pub trait Storage: Send {
    /// Copies the stored region into the start of `buf` and returns the number
    /// of bytes copied. A region that was never written reads as zero bytes.
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;

    /// Replaces the whole stored region with `data`.
    fn write_region(&mut self, data: &[u8]) -> anyhow::Result<()>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        (**self).read_region(buf)
    }

    fn write_region(&mut self, data: &[u8]) -> anyhow::Result<()> {
        (**self).write_region(data)
    }
}

/// In-memory region, zero-filled like freshly erased flash.
#[derive(Clone, Debug)]
pub struct MemStorage {
    region: Vec<u8>,
    writes: usize,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::with_bytes(&[])
    }

    pub fn with_bytes(bytes: &[u8]) -> Self {
        let mut region = vec![0u8; REGION_SIZE];
        let n = bytes.len().min(REGION_SIZE);
        region[..n].copy_from_slice(&bytes[..n]);
        Self { region, writes: 0 }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.region
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStorage {
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let n = buf.len().min(self.region.len());
        buf[..n].copy_from_slice(&self.region[..n]);
        Ok(n)
    }

    fn write_region(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() > REGION_SIZE {
            bail!("{} bytes do not fit in the {REGION_SIZE} byte region", data.len());
        }
        self.region.fill(0);
        self.region[..data.len()].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}

/// Owns the persisted configuration region.
pub struct ConfigStore<S> {
    storage: S,
}

impl<S: Storage> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn is_valid(record: &ConfigRecord) -> bool {
        record.is_valid()
    }

    /// Reads the region verbatim. Never fails: unreadable, erased or corrupt
    /// storage comes back as an invalid record.
    pub fn load(&mut self) -> ConfigRecord {
        let mut region = [0u8; REGION_SIZE];
        info!("Reading up to {REGION_SIZE} bytes of config...");
        match self.storage.read_region(&mut region) {
            Ok(n) => info!("Got {n} bytes of config. Parsing..."),
            Err(e) => {
                error!("Config read error {e:?}");
                return ConfigRecord::blank();
            }
        }
        decode_region(&region)
    }

    /// Stamps the presence marker on `record` and writes it as one block.
    /// On failure the caller's marker is left as it was.
    pub fn save(&mut self, record: &mut ConfigRecord) -> anyhow::Result<()> {
        let previous = record.marker();
        record.set_marker(PRESENCE_MARKER);

        let result = encode_region(record).and_then(|region| {
            info!("Encoded config to {REGION_SIZE} bytes. Saving...");
            self.storage.write_region(&region)
        });

        match result {
            Ok(()) => {
                info!("Config saved.");
                Ok(())
            }
            Err(e) => {
                record.set_marker(previous);
                error!("Cannot save config: {e:?}");
                Err(e)
            }
        }
    }

    /// Zero-fills the region, clearing the marker and every field at once.
    pub fn erase(&mut self) -> anyhow::Result<()> {
        warn!("Erasing config...");
        self.storage.write_region(&[0u8; REGION_SIZE])?;
        info!("Config erased.");
        Ok(())
    }
}

fn encode_region(record: &ConfigRecord) -> anyhow::Result<[u8; REGION_SIZE]> {
    let mut region = [0u8; REGION_SIZE];
    let len = match postcard::to_slice_crc32(record, &mut region[HEADER_SIZE..], CRC.digest()) {
        Ok(d) => d.len(),
        Err(e) => bail!("Cannot encode config to buffer {e:?}"),
    };
    region[..4].copy_from_slice(&record.marker().to_le_bytes());
    region[4..HEADER_SIZE].copy_from_slice(&(len as u16).to_le_bytes());
    Ok(region)
}

fn decode_region(region: &[u8; REGION_SIZE]) -> ConfigRecord {
    let marker = u32::from_le_bytes([region[0], region[1], region[2], region[3]]);
    let len = u16::from_le_bytes([region[4], region[5]]) as usize;

    let mut record = if len == 0 {
        info!("Config region is empty.");
        ConfigRecord::blank()
    } else if len > REGION_SIZE - HEADER_SIZE {
        warn!("Config payload length {len} is out of bounds");
        ConfigRecord::blank()
    } else {
        let payload = &region[HEADER_SIZE..HEADER_SIZE + len];
        match postcard::from_bytes_crc32::<ConfigRecord>(payload, CRC.digest()) {
            Ok(c) => {
                info!("Successfully parsed config.");
                c
            }
            Err(e) => {
                warn!("Cannot parse config: {e:?}");
                ConfigRecord::blank()
            }
        }
    };
    record.set_marker(marker);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid_record() -> ConfigRecord {
        let mut c = ConfigRecord::default();
        c.set_wifi_ssid("homenet").unwrap();
        c.set_wifi_passphrase("hunter22").unwrap();
        c.set_hostname("kitchen").unwrap();
        c.set_broker_address("10.0.0.2").unwrap();
        c.set_broker_port(8883);
        c.set_broker_username("sensor").unwrap();
        c.set_broker_password("s3cret").unwrap();
        c.set_publish_topic("home/kitchen/climate").unwrap();
        c.set_temperature_correction(4).unwrap();
        c.set_publish_interval_secs(30).unwrap();
        c
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn read_region(&mut self, _buf: &mut [u8]) -> anyhow::Result<usize> {
            bail!("flash read failed")
        }

        fn write_region(&mut self, _data: &[u8]) -> anyhow::Result<()> {
            bail!("flash write failed")
        }
    }

    #[test]
    fn fresh_storage_loads_invalid() {
        let mut store = ConfigStore::new(MemStorage::new());
        let c = store.load();
        assert!(!c.is_valid());
        assert_eq!(c, ConfigRecord::blank());
    }

    #[test]
    fn save_keeps_marker_in_memory() {
        let mut store = ConfigStore::new(MemStorage::new());
        let mut c = valid_record();
        assert!(!ConfigStore::<MemStorage>::is_valid(&c));
        store.save(&mut c).unwrap();
        assert_eq!(c.marker(), PRESENCE_MARKER);
        assert!(c.is_valid());
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut store = ConfigStore::new(MemStorage::new());
        let mut c = valid_record();
        store.save(&mut c).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, c);
        assert_eq!(loaded.is_valid(), c.is_valid());
        assert_eq!(store.storage().writes(), 1);
        assert_eq!(&store.storage().bytes()[..4], &PRESENCE_MARKER.to_le_bytes());
    }

    #[test]
    fn incomplete_record_round_trips_as_invalid() {
        let mut store = ConfigStore::new(MemStorage::new());
        let mut c = valid_record();
        c.set_publish_topic("").unwrap();
        store.save(&mut c).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, c);
        assert!(!loaded.is_valid());
    }

    #[test]
    fn maximum_length_fields_fit_the_region() {
        let mut store = ConfigStore::new(MemStorage::new());
        let mut c = valid_record();
        let long = "é".repeat(15);
        c.set_wifi_ssid(&long).unwrap();
        c.set_wifi_passphrase(&"p".repeat(CREDENTIAL_LEN)).unwrap();
        c.set_hostname(&"h".repeat(CREDENTIAL_LEN)).unwrap();
        c.set_broker_address("255.255.255.255").unwrap();
        c.set_broker_username(&"u".repeat(CREDENTIAL_LEN)).unwrap();
        c.set_broker_password(&"w".repeat(CREDENTIAL_LEN)).unwrap();
        c.set_publish_topic(&"t".repeat(TOPIC_LEN)).unwrap();
        store.save(&mut c).unwrap();
        assert_eq!(store.load(), c);
    }

    #[test]
    fn erase_zeroes_region() {
        let mut store = ConfigStore::new(MemStorage::new());
        let mut c = valid_record();
        store.save(&mut c).unwrap();
        store.erase().unwrap();

        assert!(store.storage().bytes().iter().all(|b| *b == 0));
        let loaded = store.load();
        assert_eq!(loaded.marker(), 0);
        assert_eq!(loaded, ConfigRecord::blank());
        assert!(!loaded.is_valid());
    }

    #[test]
    fn garbage_loads_invalid() {
        let garbage: Vec<u8> = (0..REGION_SIZE).map(|i| (i * 7 + 3) as u8).collect();
        let mut store = ConfigStore::new(MemStorage::with_bytes(&garbage));
        assert!(!store.load().is_valid());
    }

    #[test]
    fn corrupted_payload_loads_invalid() {
        let mut store = ConfigStore::new(MemStorage::new());
        let mut c = valid_record();
        store.save(&mut c).unwrap();

        let mut bytes = store.storage().bytes().to_vec();
        bytes[HEADER_SIZE + 3] ^= 0xff;
        let mut store = ConfigStore::new(MemStorage::with_bytes(&bytes));
        let loaded = store.load();
        assert!(loaded.is_present());
        assert!(!loaded.is_valid());
    }

    #[test]
    fn read_error_loads_invalid() {
        let mut store = ConfigStore::new(FailingStorage);
        assert!(!store.load().is_valid());
    }

    #[test]
    fn failed_save_restores_marker() {
        let mut store = ConfigStore::new(FailingStorage);
        let mut c = valid_record();
        assert!(store.save(&mut c).is_err());
        assert_eq!(c.marker(), 0);
        assert!(store.erase().is_err());
    }
}

// EOF
