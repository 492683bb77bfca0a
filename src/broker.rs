// broker.rs

use std::fmt;

use log::*;
use serde::Serialize;

use crate::*;

/// Minimum spacing between two broker connect attempts.
pub const BROKER_RETRY_MS: u64 = 15_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
}

#[derive(Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    pub url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl BrokerOptions {
    pub fn from_record(record: &ConfigRecord) -> Self {
        Self {
            url: format!("mqtt://{}:{}", record.broker_address(), record.broker_port()),
            client_id: record.hostname().to_string(),
            username: record.broker_username().to_string(),
            password: record.broker_password().to_string(),
        }
    }
}

impl fmt::Debug for BrokerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerOptions")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// MQTT client as seen by the session.
pub trait BrokerTransport {
    /// Starts a fresh connection. Must not wait for the broker to answer;
    /// the outcome shows up in `is_connected`.
    fn connect(&mut self, opts: &BrokerOptions) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError>;
}

pub struct BrokerSession<T> {
    transport: T,
    options: BrokerOptions,
    state: SessionState,
    last_attempt: Option<u64>,
    attempts: u32,
}

impl<T: BrokerTransport> BrokerSession<T> {
    pub fn new(transport: T, options: BrokerOptions) -> Self {
        Self {
            transport,
            options,
            state: SessionState::Disconnected,
            last_attempt: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Follows the link state reported by the transport.
    pub fn sync_link(&mut self) -> SessionState {
        let up = self.transport.is_connected();
        match (self.state, up) {
            (SessionState::Disconnected, true) => {
                info!("MQTT connected.");
                self.state = SessionState::Connected;
            }
            (SessionState::Connected, false) => {
                error!("MQTT connection closed.");
                self.state = SessionState::Disconnected;
            }
            _ => {}
        }
        self.state
    }

    /// Issues a connect attempt unless connected or the previous attempt,
    /// failed or not, is less than `BROKER_RETRY_MS` old.
    pub fn try_connect(&mut self, now_ms: u64) -> SessionState {
        if self.sync_link() == SessionState::Connected {
            return self.state;
        }
        if let Some(t) = self.last_attempt {
            if now_ms.saturating_sub(t) < BROKER_RETRY_MS {
                return self.state;
            }
        }

        self.last_attempt = Some(now_ms);
        self.attempts += 1;
        info!(
            "MQTT connecting to {} as {} (attempt #{})...",
            self.options.url, self.options.client_id, self.attempts
        );
        if let Err(e) = self.transport.connect(&self.options) {
            error!("MQTT connection failed: {e:?}");
        }
        self.sync_link()
    }

    /// Sends a retained message. Never touches the transport unless
    /// connected; a failed message is dropped, not queued.
    pub fn publish(&mut self, topic: &str, payload: &str) -> bool {
        if self.state != SessionState::Connected {
            warn!("MQTT not connected, dropping message for {topic}");
            return false;
        }

        info!("MQTT sending {topic}");
        match self.transport.publish(topic, payload.as_bytes(), true) {
            Ok(()) => true,
            Err(PublishError::Disconnected) => {
                error!("MQTT send error: {}", PublishError::Disconnected);
                self.state = SessionState::Disconnected;
                false
            }
            Err(e) => {
                error!("MQTT send error: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeBroker {
        reachable: bool,
        connected: bool,
        connects: Vec<String>,
        sent: Vec<(String, String, bool)>,
        fail_next: Option<PublishError>,
    }

    impl BrokerTransport for FakeBroker {
        fn connect(&mut self, opts: &BrokerOptions) -> anyhow::Result<()> {
            self.connects.push(opts.client_id.clone());
            if !self.reachable {
                anyhow::bail!("connection refused");
            }
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
            if let Some(e) = self.fail_next.take() {
                if matches!(e, PublishError::Disconnected) {
                    self.connected = false;
                }
                return Err(e);
            }
            self.sent.push((
                topic.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
                retain,
            ));
            Ok(())
        }
    }

    fn options() -> BrokerOptions {
        BrokerOptions {
            url: "mqtt://10.0.0.2:1883".into(),
            client_id: "porch".into(),
            username: "sensor".into(),
            password: "s3cret".into(),
        }
    }

    fn reachable() -> FakeBroker {
        FakeBroker {
            reachable: true,
            ..Default::default()
        }
    }

    #[test]
    fn options_come_from_record() {
        let mut c = ConfigRecord::default();
        c.set_hostname("porch").unwrap();
        c.set_broker_address("10.0.0.2").unwrap();
        c.set_broker_port(1884);
        c.set_broker_username("sensor").unwrap();
        c.set_broker_password("s3cret").unwrap();
        let opts = BrokerOptions::from_record(&c);
        assert_eq!(opts.url, "mqtt://10.0.0.2:1884");
        assert_eq!(opts.client_id, "porch");
        assert_eq!(opts.username, "sensor");
        assert_eq!(opts.password, "s3cret");
        assert!(!format!("{opts:?}").contains("s3cret"));
    }

    #[test]
    fn connect_succeeds_once() {
        let mut s = BrokerSession::new(reachable(), options());
        assert_eq!(s.try_connect(0), SessionState::Connected);
        assert_eq!(s.try_connect(20_000), SessionState::Connected);
        assert_eq!(s.transport().connects, vec!["porch".to_string()]);
    }

    #[test]
    fn failed_attempts_are_spaced() {
        let mut s = BrokerSession::new(FakeBroker::default(), options());
        let mut stamps = Vec::new();
        for t in (0..=45_000).step_by(10) {
            let before = s.attempts();
            s.try_connect(t);
            if s.attempts() != before {
                stamps.push(t);
            }
        }
        assert_eq!(stamps, vec![0, 15_000, 30_000, 45_000]);
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn publish_requires_connection() {
        let mut s = BrokerSession::new(reachable(), options());
        assert!(!s.publish("home/porch", "{}"));
        assert!(s.transport().sent.is_empty());

        s.try_connect(0);
        assert!(s.publish("home/porch", "{}"));
        assert_eq!(
            s.transport().sent,
            vec![("home/porch".to_string(), "{}".to_string(), true)]
        );
    }

    #[test]
    fn transport_error_drops_message_but_keeps_session() {
        let mut s = BrokerSession::new(reachable(), options());
        s.try_connect(0);
        s.transport_mut().fail_next = Some(PublishError::Transport("outbox full".into()));
        assert!(!s.publish("home/porch", "{}"));
        assert_eq!(s.state(), SessionState::Connected);
        assert!(s.transport().sent.is_empty());
    }

    #[test]
    fn hard_disconnect_ends_session() {
        let mut s = BrokerSession::new(reachable(), options());
        s.try_connect(0);
        s.transport_mut().fail_next = Some(PublishError::Disconnected);
        assert!(!s.publish("home/porch", "{}"));
        assert_eq!(s.state(), SessionState::Disconnected);

        // reconnect waits for the retry interval measured from the last attempt
        assert_eq!(s.try_connect(10_000), SessionState::Disconnected);
        assert_eq!(s.try_connect(15_000), SessionState::Connected);
        assert_eq!(s.attempts(), 2);
    }

    #[test]
    fn link_loss_is_noticed_without_publishing() {
        let mut s = BrokerSession::new(reachable(), options());
        s.try_connect(0);
        s.transport_mut().connected = false;
        assert_eq!(s.sync_link(), SessionState::Disconnected);
        assert!(!s.publish("home/porch", "{}"));
    }
}

// EOF
