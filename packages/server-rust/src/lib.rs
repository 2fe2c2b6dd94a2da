//! Keystone server: an HTTP service scaffold with request identity, B3
//! trace propagation, access logging, panic recovery, cooperative
//! deadlines and a SQLite/MySQL storage provider.

pub mod app;
pub mod config;
pub mod network;
pub mod storage;
pub mod telemetry;
pub mod traits;

pub use app::App;
pub use config::{AppConfig, ConfigError, ConfigOverrides};
pub use traits::UserStore;

