// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Default UTC hour of the daily closure sweep.
pub const DEFAULT_CLOSURE_SWEEP_HOUR: u32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub rust_log: String,
    pub bind_addr: String,
    /// UTC hour (0-23) at which the closure sweep runs every day.
    pub closure_sweep_hour: u32,
    /// Run one sweep immediately after boot, before the first scheduled one.
    pub closure_sweep_on_startup: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let closure_sweep_hour = env::var("CLOSURE_SWEEP_HOUR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CLOSURE_SWEEP_HOUR);
        assert!(
            closure_sweep_hour < 24,
            "CLOSURE_SWEEP_HOUR must be between 0 and 23"
        );

        let closure_sweep_on_startup = env::var("CLOSURE_SWEEP_ON_STARTUP")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(false);

        Self {
            database_url,
            database_max_connections,
            rust_log,
            bind_addr,
            closure_sweep_hour,
            closure_sweep_on_startup,
        }
    }
}
