// network.rs

use std::fmt;

use log::*;
use serde::Serialize;

use crate::*;

/// Minimum spacing between two station connect attempts.
pub const STATION_RETRY_MS: u64 = 12_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum NetMode {
    /// No usable config, access point only.
    #[default]
    Unconfigured,
    /// Access point up while trying to join the configured network.
    ApAndStation,
    /// Joined the configured network, access point disabled.
    StationOnly,
}

impl NetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetMode::Unconfigured => "unconfigured",
            NetMode::ApAndStation => "access point + station",
            NetMode::StationOnly => "station",
        }
    }
}

impl fmt::Display for NetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StationCredentials {
    pub ssid: Credential,
    pub passphrase: Credential,
    pub hostname: Credential,
}

impl StationCredentials {
    pub fn from_record(record: &ConfigRecord) -> Self {
        Self {
            ssid: record.wifi_ssid().try_into().unwrap_or_default(),
            passphrase: record.wifi_passphrase().try_into().unwrap_or_default(),
            hostname: record.hostname().try_into().unwrap_or_default(),
        }
    }
}

impl fmt::Debug for StationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationCredentials")
            .field("ssid", &self.ssid.as_str())
            .field("hostname", &self.hostname.as_str())
            .finish_non_exhaustive()
    }
}

/// The radio as seen by the state machine. Every call must return promptly;
/// `begin_station` only issues the attempt, its result shows up later in
/// `station_up`.
pub trait WifiPort {
    fn start_access_point(&mut self, ssid: &str) -> anyhow::Result<()>;
    fn stop_access_point(&mut self) -> anyhow::Result<()>;
    fn begin_station(&mut self, creds: &StationCredentials) -> anyhow::Result<()>;
    fn station_up(&mut self) -> bool;
    /// Advertise `hostname` on the joined network (mDNS).
    fn announce(&mut self, hostname: &str) -> anyhow::Result<()>;
}

pub struct NetworkStateMachine<W> {
    port: W,
    mode: NetMode,
    ap_ssid: Credential,
    station: Option<StationCredentials>,
    last_attempt: Option<u64>,
    attempts: u32,
    link_up: bool,
}

impl<W: WifiPort> NetworkStateMachine<W> {
    /// Brings up the access point and, if `record` is valid, issues the
    /// first station attempt right away.
    pub fn start(port: W, record: &ConfigRecord, now_ms: u64) -> Self {
        let name = match record.hostname() {
            "" => DEFAULT_HOSTNAME,
            h => h,
        };
        let mut ap_ssid = Credential::new();
        if let Err(e) = bounded_copy(&mut ap_ssid, name, "host") {
            warn!("Access point name shortened: {e}");
        }

        let mut sm = Self {
            port,
            mode: NetMode::Unconfigured,
            ap_ssid,
            station: None,
            last_attempt: None,
            attempts: 0,
            link_up: false,
        };
        sm.start_ap();

        match record.validate() {
            Ok(()) => {
                sm.station = Some(StationCredentials::from_record(record));
                sm.mode = NetMode::ApAndStation;
                sm.attempt(now_ms);
            }
            Err(e) => {
                warn!("Config is not usable ({e}), staying in access point mode.");
            }
        }
        sm
    }

    /// Picks up link changes and issues a station attempt when one is due.
    pub fn poll(&mut self, now_ms: u64) -> NetMode {
        if self.mode == NetMode::Unconfigured {
            return self.mode;
        }

        let up = self.port.station_up();
        if up != self.link_up {
            if up {
                self.on_station_up();
            } else {
                self.on_station_down();
            }
        }

        if self.mode == NetMode::ApAndStation && self.retry_due(now_ms) {
            self.attempt(now_ms);
        }
        self.mode
    }

    pub fn on_station_up(&mut self) {
        self.link_up = true;
        if self.mode != NetMode::ApAndStation {
            return;
        }

        info!("WiFi connected.");
        self.mode = NetMode::StationOnly;
        if let Err(e) = self.port.stop_access_point() {
            error!("Cannot stop access point: {e:?}");
        }
        if let Some(creds) = self.station.as_ref() {
            if let Err(e) = self.port.announce(&creds.hostname) {
                error!("mDNS announce failed: {e:?}");
            }
        }
    }

    pub fn on_station_down(&mut self) {
        self.link_up = false;
        if self.mode != NetMode::StationOnly {
            return;
        }

        warn!("WiFi disconnected, re-enabling access point.");
        self.mode = NetMode::ApAndStation;
        self.start_ap();
    }

    pub fn mode(&self) -> NetMode {
        self.mode
    }

    pub fn ap_ssid(&self) -> &str {
        &self.ap_ssid
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt(&self) -> Option<u64> {
        self.last_attempt
    }

    pub fn port(&self) -> &W {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut W {
        &mut self.port
    }

    fn retry_due(&self, now_ms: u64) -> bool {
        self.last_attempt
            .map_or(true, |t| now_ms.saturating_sub(t) >= STATION_RETRY_MS)
    }

    fn start_ap(&mut self) {
        info!("Starting access point {}...", self.ap_ssid);
        if let Err(e) = self.port.start_access_point(&self.ap_ssid) {
            error!("Cannot start access point: {e:?}");
        }
    }

    fn attempt(&mut self, now_ms: u64) {
        let Some(creds) = self.station.as_ref() else {
            return;
        };
        self.last_attempt = Some(now_ms);
        self.attempts += 1;
        info!("WiFi connecting to {} (attempt #{})...", creds.ssid, self.attempts);
        if let Err(e) = self.port.begin_station(creds) {
            error!("WiFi connect failed: {e:?}");
        }
    }
}

/// Last setting pushed to the radio. Pushing an unchanged value again is
/// skipped, a failed push is retried next time.
#[derive(Debug)]
pub struct LastApplied<T>(Option<T>);

impl<T> Default for LastApplied<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: PartialEq> LastApplied<T> {
    /// Runs `push` only when `next` differs from what was last applied.
    /// Returns whether it ran.
    pub fn apply<E>(&mut self, next: T, push: impl FnOnce(&T) -> Result<(), E>) -> Result<bool, E> {
        if self.0.as_ref() == Some(&next) {
            return Ok(false);
        }
        push(&next)?;
        self.0 = Some(next);
        Ok(true)
    }

    pub fn current(&self) -> Option<&T> {
        self.0.as_ref()
    }
}


// EOF
