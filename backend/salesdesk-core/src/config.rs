// src/config.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::dashboard::DashboardDefaults;
use crate::hierarchy::{ManagerOverrides, DEFAULT_MANAGER_OVERRIDES};

pub const ENV_PREFIX: &str = "SALESDESK_";

/// Runtime settings, read from `SALESDESK_*` variables (a `.env` file is
/// honoured). Every field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// TLS is enabled only when both paths are set.
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Comma-separated leader codes that always resolve as managers.
    #[serde(default = "default_manager_overrides")]
    pub manager_overrides: Vec<String>,
    #[serde(default = "default_fyp_target")]
    pub default_fyp_target: Decimal,
    #[serde(default = "default_active_target")]
    pub default_active_target: u32,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/salesdesk.json")
}

fn default_manager_overrides() -> Vec<String> {
    DEFAULT_MANAGER_OVERRIDES.iter().map(|c| c.to_string()).collect()
}

fn default_fyp_target() -> Decimal {
    dec!(242000000)
}

fn default_active_target() -> u32 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_file: default_data_file(),
            cert_path: None,
            key_path: None,
            manager_overrides: default_manager_overrides(),
            default_fyp_target: default_fyp_target(),
            default_active_target: default_active_target(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenv::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env::<AppConfig>()
    }

    pub fn overrides(&self) -> ManagerOverrides {
        ManagerOverrides::new(&self.manager_overrides)
    }

    pub fn dashboard_defaults(&self) -> DashboardDefaults {
        DashboardDefaults {
            fyp_target: self.default_fyp_target,
            active_target: self.default_active_target,
        }
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.cert_path.as_ref().zip(self.key_path.as_ref())
    }
}
