//! Environment-variable configuration (spec §6 "Configuration"). Disk-backed
//! configuration is explicitly out of scope; this mirrors the teacher's
//! `Config::from_env()` / `streamer_core::config::RuntimeConfig::from_env()`
//! pattern: `dotenv().ok()` at startup, `std::env::var` reads with explicit
//! defaults, a typed error for anything missing or malformed.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

/// `HELIUS_ENDPOINTS.*` in spec §6 — named for the teacher's existing
/// `GEYSER_URL`/`X_TOKEN` convention, generalized to the four roles the
/// spec calls out.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub rpc: String,
    pub ws: String,
    pub stream: String,
    pub sender: Option<String>,
    pub x_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Endpoints,
    pub wallet_encryption_key: String,
    pub min_buy_native_raw: u64,
    pub max_age_seconds: u64,
    pub default_jito_tip_lamports: u64,
    pub lock_ttl_seconds: u64,
    pub dedup_ttl_seconds: u64,
    pub poller_interval_seconds: u64,
    pub worker_pool_count: usize,
    pub min_native_delta_raw: u64,
    pub sqlite_path: String,
    pub janitor_mcap_threshold: Option<f64>,
    pub janitor_grace: Option<Duration>,
    pub rust_log: Option<String>,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    env_var(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn parse_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env_var(key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: v,
        }),
    }
}

fn parse_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    match env_var(key) {
        None => Ok(None),
        Some(v) => v
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { field: key.to_string(), value: v }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoints = Endpoints {
            rpc: required("HELIUS_RPC_ENDPOINT")?,
            ws: env_var("HELIUS_WS_ENDPOINT").unwrap_or_default(),
            stream: required("HELIUS_STREAM_ENDPOINT")?,
            sender: env_var("HELIUS_SENDER_ENDPOINT"),
            x_token: env_var("X_TOKEN"),
        };

        let wallet_encryption_key = required("WALLET_ENCRYPTION_KEY")?;

        // MIN_BUY_NATIVE is specified in native units (default 0.001); stored
        // internally as base units (9 decimals), matching the teacher's
        // SOL-decimals assumption in trade_extractor.rs.
        let min_buy_native = parse_f64("MIN_BUY_NATIVE")?.unwrap_or(0.001);
        let min_buy_native_raw = (min_buy_native * 1_000_000_000.0).round() as u64;

        let min_native_delta = parse_f64("MIN_NATIVE_DELTA")?.unwrap_or(0.0001);
        let min_native_delta_raw = (min_native_delta * 1_000_000_000.0).round() as u64;

        let janitor_mcap_threshold = parse_f64("JANITOR_MCAP_THRESHOLD")?;
        let janitor_grace = match parse_u64("JANITOR_GRACE_MS", 0)? {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Ok(Config {
            endpoints,
            wallet_encryption_key,
            min_buy_native_raw,
            max_age_seconds: parse_u64("TRANSACTION_FILTERING_MAX_AGE_SECONDS", 30)?,
            default_jito_tip_lamports: parse_u64("DEFAULT_JITO_TIP_LAMPORTS", 10_000)?,
            lock_ttl_seconds: parse_u64("LOCK_TTL_SECONDS", 20)?,
            dedup_ttl_seconds: parse_u64("DEDUP_TTL_SECONDS", 120)?,
            poller_interval_seconds: parse_u64("POLLER_INTERVAL_SECONDS", 25)?,
            worker_pool_count: parse_u64("WORKER_POOL_COUNT", 32)? as usize,
            min_native_delta_raw,
            sqlite_path: env_var("MIRRORFLOW_DB_PATH").unwrap_or_else(|| "mirrorflow.db".to_string()),
            janitor_mcap_threshold,
            janitor_grace,
            rust_log: env_var("RUST_LOG"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_buy_native_defaults_to_one_million_lamports() {
        // 0.001 * 1e9 == 1_000_000, matching the config table's stated default.
        let raw = (0.001_f64 * 1_000_000_000.0).round() as u64;
        assert_eq!(raw, 1_000_000);
    }

    #[test]
    fn parse_u64_falls_back_to_default_when_unset() {
        env::remove_var("MIRRORFLOW_TEST_UNSET_KEY");
        assert_eq!(parse_u64("MIRRORFLOW_TEST_UNSET_KEY", 42).unwrap(), 42);
    }

    #[test]
    fn parse_u64_rejects_non_numeric_value() {
        env::set_var("MIRRORFLOW_TEST_BAD_KEY", "not-a-number");
        assert!(parse_u64("MIRRORFLOW_TEST_BAD_KEY", 1).is_err());
        env::remove_var("MIRRORFLOW_TEST_BAD_KEY");
    }
}
