use std::path::PathBuf;
use std::str::FromStr;

use chrono::TimeDelta;
use tracing::warn;

use crate::schedule::{BookingScheduler, BookingValidator, RoleAccessPolicy, TimeWindowPolicy};

/// Server settings, read once from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name that acts as administrator.
    pub admin_user: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    pub student_max_bookings: usize,
    pub student_max_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "roombook".into(),
            admin_user: "roombook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            day_start_hour: 8,
            day_end_hour: 16,
            student_max_bookings: 4,
            student_max_hours: 4,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values are logged and replaced
    /// by their default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Config::default();
        let mut cfg = Config {
            bind: get("ROOMBOOK_BIND").unwrap_or(d.bind),
            port: parsed(&get, "ROOMBOOK_PORT", d.port),
            data_dir: get("ROOMBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("ROOMBOOK_PASSWORD").unwrap_or(d.password),
            admin_user: get("ROOMBOOK_ADMIN_USER").unwrap_or(d.admin_user),
            max_connections: parsed(&get, "ROOMBOOK_MAX_CONNECTIONS", d.max_connections),
            compact_threshold: parsed(&get, "ROOMBOOK_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: get("ROOMBOOK_METRICS_PORT").and_then(|raw| match raw.parse() {
                Ok(p) => Some(p),
                Err(_) => {
                    warn!("ignoring invalid ROOMBOOK_METRICS_PORT={raw:?}, metrics disabled");
                    None
                }
            }),
            tls_cert: get("ROOMBOOK_TLS_CERT"),
            tls_key: get("ROOMBOOK_TLS_KEY"),
            day_start_hour: parsed(&get, "ROOMBOOK_DAY_START_HOUR", d.day_start_hour),
            day_end_hour: parsed(&get, "ROOMBOOK_DAY_END_HOUR", d.day_end_hour),
            student_max_bookings: parsed(&get, "ROOMBOOK_STUDENT_MAX_BOOKINGS", d.student_max_bookings),
            student_max_hours: parsed(&get, "ROOMBOOK_STUDENT_MAX_HOURS", d.student_max_hours),
        };

        if cfg.day_start_hour >= cfg.day_end_hour || cfg.day_end_hour > 24 {
            warn!(
                "invalid opening hours {}..{}, using {}..{}",
                cfg.day_start_hour, cfg.day_end_hour, d.day_start_hour, d.day_end_hour
            );
            cfg.day_start_hour = d.day_start_hour;
            cfg.day_end_hour = d.day_end_hour;
        }
        // A booking never leaves its day.
        if !(1..=24).contains(&cfg.student_max_hours) {
            warn!("ROOMBOOK_STUDENT_MAX_HOURS must be within 1..=24, using {}", d.student_max_hours);
            cfg.student_max_hours = d.student_max_hours;
        }
        if cfg.max_connections == 0 {
            warn!("ROOMBOOK_MAX_CONNECTIONS must be positive, using {}", d.max_connections);
            cfg.max_connections = d.max_connections;
        }
        cfg
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Booking rules with the configured opening hours and student quota.
    pub fn scheduler(&self) -> BookingScheduler {
        BookingScheduler {
            validator: BookingValidator::new(
                TimeWindowPolicy::new(self.day_start_hour, self.day_end_hour),
                RoleAccessPolicy::with_student_quota(
                    self.student_max_bookings,
                    TimeDelta::hours(self.student_max_hours),
                ),
            ),
        }
    }
}

fn parsed<T: FromStr + Copy>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring invalid {key}={raw:?}");
            default
        }),
    }
}
