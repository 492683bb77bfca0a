// build.rs

use std::env;

fn main() -> anyhow::Result<()> {
    // Necessary because of this issue: https://github.com/rust-lang/cargo/issues/9641
    // see also https://github.com/rust-lang/cargo/issues/9554
    if env::var_os("CARGO_FEATURE_ESP").is_some() {
        embuild::build::CfgArgs::output_propagated("ESP_IDF")?;
        embuild::build::LinkArgs::output_propagated("ESP_IDF")?;
    }

    let ap_hostname = env::var("AP_HOSTNAME").unwrap_or_else(|_| "ESP-Thermometer".into());
    let api_port = env::var("API_PORT").unwrap_or_else(|_| "80".into());

    println!("cargo:rustc-env=AP_HOSTNAME={ap_hostname}");
    println!("cargo:rustc-env=API_PORT={api_port}");
    println!("cargo:rerun-if-env-changed=AP_HOSTNAME");
    println!("cargo:rerun-if-env-changed=API_PORT");

    Ok(())
}

// EOF
