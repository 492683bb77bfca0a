// bin/esp32thermo.rs

#![warn(clippy::large_futures)]

use esp32thermo::*;
use log::*;

#[cfg(feature = "esp")]
use esp_idf_hal::gpio::{AnyInputPin, IOPin, Input, InputPin, PinDriver};

#[cfg(feature = "esp")]
const CONFIG_RESET_COUNT: i32 = 9;

#[cfg(feature = "esp")]
esp_idf_sys::esp_app_desc!();

#[cfg(feature = "esp")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::{delay::FreeRtos, prelude::Peripherals};
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs, wifi::EspWifi};
    use esp_idf_sys::esp;

    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // eventfd is needed by our mio poll implementation.  Note you should set max_fds
    // higher if you have other code that may need eventfd.
    #[allow(clippy::needless_update)]
    let eventfd_config = esp_idf_sys::esp_vfs_eventfd_config_t {
        max_fds: 1,
        ..Default::default()
    };
    esp! { unsafe { esp_idf_sys::esp_vfs_eventfd_register(&eventfd_config) } }?;

    info!("Hello.");
    info!("Starting up, firmware v{FW_VERSION}");

    let sysloop = EspSystemEventLoop::take()?;
    let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

    let ns = env!("CARGO_BIN_NAME");
    let nvs = nvs::EspNvs::new(nvs_default_partition.clone(), ns, true)?;
    info!("Got namespace {ns:?} from default partition");

    let mut store: ConfigStore<Box<dyn Storage>> = ConfigStore::new(Box::new(NvsStorage::new(nvs)));
    let config = store.load();

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    #[cfg(feature = "esp32c3")]
    let button = PinDriver::input(pins.gpio9.downgrade_input())?;
    #[cfg(not(feature = "esp32c3"))]
    let button = PinDriver::input(pins.gpio0.downgrade_input())?;

    let sensor = DhtSensor::new(pins.gpio4.downgrade())?;
    let wifi = EspWifi::new(peripherals.modem, sysloop, Some(nvs_default_partition))?;

    let state = Arc::new(AppState::new(store, config.clone(), api_port()));
    let device = Device::boot(
        config,
        EspWifiPort::new(wifi),
        EspBroker::new(),
        sensor,
        state.uptime_ms(),
    );

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(Box::pin(async move {
            info!("Entering main loop...");
            tokio::select! {
                r = Box::pin(run_boot(state.clone(), device)) => {
                    if let Err(e) = r {
                        error!("run_boot() failed: {e:?}");
                    }
                }
                _ = Box::pin(poll_reset(state.clone(), button)) => { error!("poll_reset() ended."); }
            };
        }));

    // not actually returning from main() but we reboot instead
    info!("main() finished, reboot.");
    FreeRtos::delay_ms(500);
    esp_idf_hal::reset::restart();
}

#[cfg(feature = "esp")]
async fn poll_reset(state: Arc<AppState>, button: PinDriver<'_, AnyInputPin, Input>) -> anyhow::Result<()> {
    loop {
        sleep(Duration::from_secs(2)).await;

        if button.is_low() {
            Box::pin(reset_button(&state, &button)).await?;
        }
    }
}

#[cfg(feature = "esp")]
async fn reset_button(state: &AppState, button: &PinDriver<'_, AnyInputPin, Input>) -> anyhow::Result<()> {
    let mut reset_cnt = CONFIG_RESET_COUNT;

    while button.is_low() {
        // button is pressed and kept down, countdown and factory reset if reach zero
        error!("Reset? {reset_cnt}");

        if reset_cnt == 0 {
            error!("Factory resetting...");
            let mut store = state.store.lock().await;
            reset_config(&mut *store, &state.restart, state.uptime_ms())?;
            return Ok(());
        }

        reset_cnt -= 1;
        sleep(Duration::from_millis(500)).await;
    }
    Ok(())
}

#[cfg(not(feature = "esp"))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "esp32thermo.cfg".into());
    let api_port = std::env::var("API_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);
    info!("Starting up, firmware v{FW_VERSION}, config in {path}");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // every pass is one simulated boot
    loop {
        let mut store: ConfigStore<Box<dyn Storage>> = ConfigStore::new(Box::new(FileStorage::new(&path)));
        let config = store.load();
        let state = Arc::new(AppState::new(store, config.clone(), api_port));
        let device = Device::boot(
            config,
            SimWifi::new(200),
            SimBroker::default(),
            SimSensor::default(),
            state.uptime_ms(),
        );

        runtime.block_on(Box::pin(run_boot(state, device)))?;
        info!("Restarting...");
    }
}

// EOF
