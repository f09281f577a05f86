//! Server configuration read from `SALON_*` environment variables.

use std::fmt;
use std::path::PathBuf;

use crate::engine::{Calendar, GridError, TimeGrid, WallClock};
use crate::model::Slot;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub calendar: Calendar,
    pub notify_url: Option<String>,
    pub calendar_url: Option<String>,
    /// Printed on confirmation invites.
    pub location: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Grid(GridError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Grid(e) => write!(f, "invalid business hours: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<GridError> for ConfigError {
    fn from(e: GridError) -> Self {
        ConfigError::Grid(e)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset and empty variables take
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let day_start = parse_or(&get, "SALON_DAY_START", Slot(8 * 60), |s| s.parse().ok())?;
        let day_end = parse_or(&get, "SALON_DAY_END", Slot(17 * 60), parse_day_end)?;
        let slot_minutes = parse_or(&get, "SALON_SLOT_MINUTES", 15u16, |s| s.parse().ok())?;
        let lunch_hour = parse_or(&get, "SALON_LUNCH_HOUR", Some(12u16), |s| {
            match s.to_lowercase().as_str() {
                "none" | "off" => Some(None),
                h => h.parse().ok().map(Some),
            }
        })?;
        let offset = parse_or(&get, "SALON_UTC_OFFSET_MINUTES", 0i32, |s| s.parse().ok())?;
        let grid = TimeGrid::new(day_start.minute(), day_end.minute(), slot_minutes, lunch_hour)?;

        Ok(Self {
            port: parse_or(&get, "SALON_PORT", 5433, |s| s.parse().ok())?,
            bind: get("SALON_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("SALON_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("SALON_PASSWORD").unwrap_or_else(|| "salon".into()),
            max_connections: parse_or(&get, "SALON_MAX_CONNECTIONS", 256, |s| s.parse().ok())?,
            compact_threshold: parse_or(&get, "SALON_COMPACT_THRESHOLD", 1000, |s| s.parse().ok())?,
            metrics_port: parse_or(&get, "SALON_METRICS_PORT", None, |s| s.parse().ok().map(Some))?,
            tls_cert: get("SALON_TLS_CERT"),
            tls_key: get("SALON_TLS_KEY"),
            calendar: Calendar::new(grid, WallClock::with_offset_minutes(offset)),
            notify_url: get("SALON_NOTIFY_URL"),
            calendar_url: get("SALON_CALENDAR_URL"),
            location: get("SALON_LOCATION"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// `24:00` closes the day at midnight.
fn parse_day_end(s: &str) -> Option<Slot> {
    if s.trim() == "24:00" {
        Some(Slot(24 * 60))
    } else {
        s.parse().ok()
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => parse(value.trim()).ok_or(ConfigError::Invalid { var, value }),
    }
}
