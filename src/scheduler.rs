// scheduler.rs

use log::*;
use serde::Serialize;

use crate::*;

/// Temperature/humidity source. `None` means the sensor gave no reading.
pub trait Sensor {
    fn read_temperature(&mut self) -> Option<f32>;
    fn read_humidity(&mut self) -> Option<f32>;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
}

// Existing subscribers expect the values as strings.
#[derive(Serialize)]
struct Payload {
    temperature: String,
    humidity: String,
}

impl Reading {
    pub fn payload(&self) -> String {
        serde_json::to_string(&Payload {
            temperature: format!("{:.2}", self.temperature),
            humidity: format!("{:.2}", self.humidity),
        })
        .unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cycle {
    /// Not due yet, or nothing to do.
    Idle,
    SensorFault,
    Published(Reading),
    Dropped(Reading),
}

pub struct PublishScheduler {
    topic: Topic,
    interval_ms: u64,
    correction: f32,
    last_fired: Option<u64>,
    last_reading: Option<Reading>,
    published: u32,
    dropped: u32,
    faults: u32,
}

impl PublishScheduler {
    pub fn new(record: &ConfigRecord) -> Self {
        let secs = record.publish_interval_secs().max(MIN_PUBLISH_INTERVAL);
        Self {
            topic: record.publish_topic().try_into().unwrap_or_default(),
            interval_ms: u64::from(secs) * 1000,
            correction: f32::from(record.temperature_correction()),
            last_fired: None,
            last_reading: None,
            published: 0,
            dropped: 0,
            faults: 0,
        }
    }

    /// The first check after boot is always due.
    pub fn due(&self, now_ms: u64) -> bool {
        self.last_fired
            .map_or(true, |t| now_ms.saturating_sub(t) >= self.interval_ms)
    }

    /// Takes one reading and publishes it when due. The firing time advances
    /// whatever the outcome, sensor faults included.
    pub fn poll<S: Sensor, T: BrokerTransport>(
        &mut self,
        now_ms: u64,
        sensor: &mut S,
        session: &mut BrokerSession<T>,
    ) -> Cycle {
        if !self.due(now_ms) {
            return Cycle::Idle;
        }
        self.last_fired = Some(now_ms);

        let Some(reading) = self.acquire(sensor) else {
            self.faults += 1;
            warn!("Failed to read from sensor, skipping this cycle.");
            return Cycle::SensorFault;
        };
        self.last_reading = Some(reading);

        if session.publish(&self.topic, &reading.payload()) {
            self.published += 1;
            Cycle::Published(reading)
        } else {
            self.dropped += 1;
            Cycle::Dropped(reading)
        }
    }

    fn acquire<S: Sensor>(&self, sensor: &mut S) -> Option<Reading> {
        let humidity = sensor.read_humidity().filter(|v| v.is_finite());
        let temperature = sensor.read_temperature().filter(|v| v.is_finite());
        Some(Reading {
            temperature: temperature? + self.correction,
            humidity: humidity?,
        })
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_fired(&self) -> Option<u64> {
        self.last_fired
    }

    pub fn last_reading(&self) -> Option<Reading> {
        self.last_reading
    }

    pub fn published(&self) -> u32 {
        self.published
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn faults(&self) -> u32 {
        self.faults
    }
}


// EOF
