// apiserver.rs

use std::borrow::Cow;

use askama::Template;
use axum::{
    Json, Router,
    body::Body,
    extract::{Form, State},
    http::{Response, StatusCode},
    response::{Html, IntoResponse, Redirect},
    routing::*,
};
use log::*;
use tower_http::cors::CorsLayer;

use crate::*;

#[derive(Template)]
#[template(path = "index.html.ask", escape = "html")]
pub struct IndexPage<'a> {
    pub cfg: Cow<'a, ConfigRecord>,
    pub mode: &'a str,
    pub ap_ssid: &'a str,
    pub version: &'a str,
}

impl<'a> IndexPage<'a> {
    /// An erased device gets the factory defaults in the form instead of zeros.
    pub fn new(cfg: &'a ConfigRecord, mode: NetMode, ap_ssid: &'a str) -> Self {
        let cfg = if cfg.is_present() {
            Cow::Borrowed(cfg)
        } else {
            Cow::Owned(ConfigRecord::default())
        };
        Self {
            cfg,
            mode: mode.as_str(),
            ap_ssid,
            version: FW_VERSION,
        }
    }
}

pub async fn run_api_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let listen = format!("0.0.0.0:{}", state.api_port);
    let addr = listen.parse::<net::SocketAddr>()?;

    let app = Router::new()
        .route("/", get(get_index))
        .route("/config", get(get_config).post(post_config))
        .route("/reset", post(post_reset))
        .route("/status", get(get_status))
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening to {listen}");
    Ok(axum::serve(listener, app.into_make_service()).await?)
}

pub async fn get_index(State(state): State<Arc<AppState>>) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_index()");

    let (mode, ap_ssid) = {
        let status = state.status.read().await;
        (status.mode, status.ap_ssid.clone())
    };
    let index = match IndexPage::new(&state.config, mode, &ap_ssid).render() {
        Err(e) => {
            let err_msg = format!("Index template error: {e:?}\n");
            error!("{err_msg}");
            return (StatusCode::INTERNAL_SERVER_ERROR, err_msg).into_response();
        }
        Ok(s) => s,
    };
    (StatusCode::OK, Html(index)).into_response()
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ConfigView>) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_config()");
    (StatusCode::OK, Json(state.config.view()))
}

pub async fn post_config(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ConfigForm>,
) -> (StatusCode, String) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} post_config()");

    let mut store = state.store.lock().await;
    match apply_config(&mut *store, &state.restart, &form, state.uptime_ms()) {
        Ok(_) => (StatusCode::OK, "OK".to_string()),
        Err(ApplyError::Config(e)) => {
            let msg = format!("Config rejected: {e}");
            error!("{msg}");
            (StatusCode::BAD_REQUEST, msg)
        }
        Err(e) => {
            let msg = format!("{e}");
            error!("{msg}");
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

pub async fn post_reset(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} post_reset()");

    let mut store = state.store.lock().await;
    match reset_config(&mut *store, &state.restart, state.uptime_ms()) {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(e) => {
            let msg = format!("Storage erase error: {e:?}");
            error!("{msg}");
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> (StatusCode, Json<DeviceStatus>) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_status()");
    (StatusCode::OK, Json(state.status.read().await.clone()))
}

// Captive portal clients probe all sorts of paths.
async fn fallback() -> Redirect {
    Redirect::temporary("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_prefills_all_but_secrets() {
        let form = ConfigForm {
            wifi_ssid: "homenet".into(),
            wifi_passwd: "hunter22".into(),
            host: "porch".into(),
            broker_ip: "10.0.0.2".into(),
            mqtt_port: "1884".into(),
            mqtt_user: "sensor".into(),
            mqtt_passwd: "s3cret".into(),
            mqtt_topic: "home/<porch>".into(),
            temp_correction: "-2".into(),
            mqtt_delay: "30".into(),
        };
        let mut cfg = ConfigRecord::from_form(&form).unwrap();
        cfg.set_marker(PRESENCE_MARKER);
        let html = IndexPage::new(&cfg, NetMode::ApAndStation, "porch")
            .render()
            .unwrap();

        for name in [
            "wifi-ssid",
            "wifi-passwd",
            "host",
            "broker-ip",
            "mqtt-port",
            "mqtt-user",
            "mqtt-passwd",
            "mqtt-topic",
            "temp-correction",
            "mqtt-delay",
        ] {
            assert!(html.contains(&format!("name=\"{name}\"")), "{name} missing");
        }
        assert!(html.contains("value=\"homenet\""));
        assert!(html.contains("value=\"1884\""));
        assert!(html.contains("value=\"-2\""));
        // entity spelling is up to the template engine
        assert!(!html.contains("<porch>"));
        assert!(html.contains("&#60;porch") || html.contains("&lt;porch"));
        assert!(!html.contains("hunter22"));
        assert!(!html.contains("s3cret"));
    }

    #[test]
    fn erased_device_form_shows_defaults() {
        let blank = ConfigRecord::blank();
        let html = IndexPage::new(&blank, NetMode::Unconfigured, DEFAULT_HOSTNAME)
            .render()
            .unwrap();
        assert!(html.contains("name=\"mqtt-port\" min=\"1\" max=\"65535\" value=\"1883\""));
        assert!(html.contains("name=\"mqtt-delay\" min=\"2\" max=\"65535\" value=\"10\""));
        assert!(html.contains(NetMode::Unconfigured.as_str()));
    }
}

// EOF
