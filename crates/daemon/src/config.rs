//! Daemon configuration from `TICKETLINE_*` environment variables

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.ticketline/store.db";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;
const DEFAULT_EXPIRY_TICK_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_OP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// Identity bound at startup
    pub identity: Option<String>,
    pub display_name: Option<String>,
    /// `None` selects the log-only transport
    pub push_relay_url: Option<String>,
    pub expiry_tick: Duration,
    pub poll_interval: Duration,
    pub op_timeout: Duration,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("TICKETLINE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = PathBuf::from(
            shellexpand::full(&db_path)
                .with_context(|| format!("Failed to expand TICKETLINE_DB_PATH '{}'", db_path))?
                .into_owned(),
        );

        let log_format = match get("TICKETLINE_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            db_path,
            rpc_host: get("TICKETLINE_RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port: parse(&get, "TICKETLINE_RPC_PORT", DEFAULT_RPC_PORT)?,
            identity: get("TICKETLINE_IDENTITY").map(|v| v.trim().to_string()),
            display_name: get("TICKETLINE_DISPLAY_NAME"),
            push_relay_url: get("TICKETLINE_PUSH_RELAY_URL"),
            expiry_tick: Duration::from_secs(parse(
                &get,
                "TICKETLINE_EXPIRY_TICK_SECS",
                DEFAULT_EXPIRY_TICK_SECS,
            )?),
            poll_interval: Duration::from_millis(parse(
                &get,
                "TICKETLINE_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            op_timeout: Duration::from_secs(parse(
                &get,
                "TICKETLINE_OP_TIMEOUT_SECS",
                DEFAULT_OP_TIMEOUT_SECS,
            )?),
            log_format,
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
