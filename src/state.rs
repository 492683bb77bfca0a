// state.rs

use std::{sync::Mutex as StdMutex, time::Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::*;

/// One-shot restart deadline, armed by the portal and checked by the
/// control loop on every iteration.
#[derive(Debug, Default)]
pub struct RestartTimer {
    deadline: StdMutex<Option<u64>>,
}

impl RestartTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, now_ms: u64, delay_ms: u64) {
        let at = now_ms.saturating_add(delay_ms);
        if let Ok(mut d) = self.deadline.lock() {
            // an earlier deadline wins
            *d = Some((*d).map_or(at, |prev| prev.min(at)));
        }
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline.lock().ok().and_then(|d| *d)
    }

    pub fn due(&self, now_ms: u64) -> bool {
        self.deadline().is_some_and(|at| now_ms >= at)
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceStatus {
    pub mode: NetMode,
    pub ap_ssid: String,
    pub station_attempts: u32,
    pub broker: SessionState,
    pub broker_attempts: u32,
    pub published: u32,
    pub dropped: u32,
    pub sensor_faults: u32,
    pub last_reading: Option<Reading>,
    pub last_publish: Option<String>,
    pub uptime_s: u64,
}

/// State shared between the control loop and the API server.
pub struct AppState {
    pub store: Mutex<ConfigStore<Box<dyn Storage>>>,
    /// Record this boot runs with. Read-only.
    pub config: ConfigRecord,
    pub status: RwLock<DeviceStatus>,
    pub restart: RestartTimer,
    pub api_cnt: AtomicU32,
    pub api_port: u16,
    boot: Instant,
}

impl AppState {
    pub fn new(store: ConfigStore<Box<dyn Storage>>, config: ConfigRecord, api_port: u16) -> Self {
        AppState {
            store: Mutex::new(store),
            config,
            status: RwLock::new(DeviceStatus::default()),
            restart: RestartTimer::new(),
            api_cnt: AtomicU32::new(0),
            api_port,
            boot: Instant::now(),
        }
    }

    /// Monotonic milliseconds since this boot.
    pub fn uptime_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_timer_fires_at_deadline() {
        let t = RestartTimer::new();
        assert!(!t.due(u64::MAX));

        t.schedule(1_000, 3_000);
        assert_eq!(t.deadline(), Some(4_000));
        assert!(!t.due(3_999));
        assert!(t.due(4_000));
    }

    #[test]
    fn earlier_restart_wins() {
        let t = RestartTimer::new();
        t.schedule(5_000, 3_000);
        t.schedule(6_000, 3_000);
        assert_eq!(t.deadline(), Some(8_000));
        t.schedule(0, 3_000);
        assert_eq!(t.deadline(), Some(3_000));
    }
}

// EOF
