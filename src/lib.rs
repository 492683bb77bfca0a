// lib.rs
#![warn(clippy::large_futures)]

pub use std::{
    net,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

pub use anyhow::bail;
pub use chrono::Local;
pub use serde::{Deserialize, Serialize};
pub use tokio::{
    sync::RwLock,
    time::{Duration, sleep},
};

mod error;
pub use error::*;

mod config;
pub use config::*;

mod storage;
pub use storage::*;

mod network;
pub use network::*;

mod broker;
pub use broker::*;

mod scheduler;
pub use scheduler::*;

mod state;
pub use state::*;

mod portal;
pub use portal::*;

mod device;
pub use device::*;

mod apiserver;
pub use apiserver::*;

#[cfg(feature = "esp")]
mod esp;
#[cfg(feature = "esp")]
pub use esp::*;

#[cfg(not(feature = "esp"))]
mod host;
#[cfg(not(feature = "esp"))]
pub use host::*;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

// EOF
