// device.rs

use log::*;

use crate::*;

/// Pause at the end of every control loop iteration.
pub const LOOP_PAUSE_MS: u64 = 10;

/// Everything one boot of the device runs with, owned in one place.
pub struct Device<W, B, S> {
    config: ConfigRecord,
    network: NetworkStateMachine<W>,
    broker: BrokerSession<B>,
    scheduler: PublishScheduler,
    sensor: S,
}

impl<W: WifiPort, B: BrokerTransport, S: Sensor> Device<W, B, S> {
    pub fn boot(config: ConfigRecord, wifi: W, broker: B, sensor: S, now_ms: u64) -> Self {
        info!("My config:\n{config:#?}");
        let network = NetworkStateMachine::start(wifi, &config, now_ms);
        let broker = BrokerSession::new(broker, BrokerOptions::from_record(&config));
        let scheduler = PublishScheduler::new(&config);
        Device {
            config,
            network,
            broker,
            scheduler,
            sensor,
        }
    }

    /// One pass over the components. The broker only runs while the station
    /// link is up, the scheduler only while the broker session is up.
    pub fn tick(&mut self, now_ms: u64) -> Cycle {
        if self.network.poll(now_ms) != NetMode::StationOnly {
            self.broker.sync_link();
            return Cycle::Idle;
        }
        if self.broker.try_connect(now_ms) != SessionState::Connected {
            return Cycle::Idle;
        }
        self.scheduler.poll(now_ms, &mut self.sensor, &mut self.broker)
    }

    pub fn status(&self, now_ms: u64) -> DeviceStatus {
        let mode = self.network.mode();
        DeviceStatus {
            mode,
            ap_ssid: self.network.ap_ssid().to_string(),
            station_attempts: self.network.attempts(),
            // no broker session without the station link
            broker: match mode {
                NetMode::StationOnly => self.broker.state(),
                _ => SessionState::Disconnected,
            },
            broker_attempts: self.broker.attempts(),
            published: self.scheduler.published(),
            dropped: self.scheduler.dropped(),
            sensor_faults: self.scheduler.faults(),
            last_reading: self.scheduler.last_reading(),
            last_publish: None,
            uptime_s: now_ms / 1000,
        }
    }

    pub fn config(&self) -> &ConfigRecord {
        &self.config
    }

    pub fn network(&self) -> &NetworkStateMachine<W> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut NetworkStateMachine<W> {
        &mut self.network
    }

    pub fn broker(&self) -> &BrokerSession<B> {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut BrokerSession<B> {
        &mut self.broker
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

/// The control loop. Returns once the restart timer fires; the caller then
/// restarts, which reloads the stored config.
pub async fn run_device<W, B, S>(state: Arc<AppState>, mut device: Device<W, B, S>) -> anyhow::Result<()>
where
    W: WifiPort,
    B: BrokerTransport,
    S: Sensor,
{
    info!("Entering control loop...");
    loop {
        let now_ms = state.uptime_ms();
        if state.restart.due(now_ms) {
            info!("Restart deadline reached.");
            return Ok(());
        }

        let cycle = device.tick(now_ms);
        {
            let mut status = state.status.write().await;
            let last_publish = match cycle {
                Cycle::Published(_) => Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
                _ => status.last_publish.take(),
            };
            *status = DeviceStatus {
                last_publish,
                ..device.status(now_ms)
            };
        }

        sleep(Duration::from_millis(LOOP_PAUSE_MS)).await;
    }
}

/// Runs one boot: the control loop and the API server side by side on the
/// current thread. Returns `Ok` when a restart is due.
pub async fn run_boot<W, B, S>(state: Arc<AppState>, device: Device<W, B, S>) -> anyhow::Result<()>
where
    W: WifiPort,
    B: BrokerTransport,
    S: Sensor,
{
    tokio::select! {
        r = Box::pin(run_device(state.clone(), device)) => {
            info!("run_device() ended.");
            r
        }
        r = Box::pin(run_api_server(state.clone())) => {
            error!("run_api_server() ended.");
            r
        }
    }
}


// EOF
