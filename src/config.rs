//! Runtime configuration parsed from environment variables.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file in the working directory. Everything except `DATABASE_URL` has a
//! typed default so a bare `DATABASE_URL=... tabletop` boots.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SESSION_TTL_HOURS: i64 = 720;
const DEFAULT_WS_TICKET_TTL_SECS: i64 = 60;
const DEFAULT_INVITATION_TTL_HOURS: i64 = 168;
const DEFAULT_PRESENCE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRESENCE_SWEEP_SECS: u64 = 5;
const DEFAULT_DICE_ROLL_DELAY_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub session_ttl_hours: i64,
    pub ws_ticket_ttl_secs: i64,
    pub invitation_ttl_hours: i64,
    pub presence_timeout: Duration,
    pub presence_sweep: Duration,
    pub dice_roll_delay: Duration,
    /// Forces the `Secure` cookie attribute. Off by default for local HTTP.
    pub cookie_secure: bool,
}

impl Config {
    /// Load `.env` (if present) and parse the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is unset, a numeric variable
    /// does not parse, or a presence interval is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is normal in deployed environments.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            session_ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?,
            ws_ticket_ttl_secs: parse_or(&lookup, "WS_TICKET_TTL_SECS", DEFAULT_WS_TICKET_TTL_SECS)?,
            invitation_ttl_hours: parse_or(&lookup, "INVITATION_TTL_HOURS", DEFAULT_INVITATION_TTL_HOURS)?,
            presence_timeout: nonzero_secs(&lookup, "PRESENCE_TIMEOUT_SECS", DEFAULT_PRESENCE_TIMEOUT_SECS)?,
            presence_sweep: nonzero_secs(&lookup, "PRESENCE_SWEEP_SECS", DEFAULT_PRESENCE_SWEEP_SECS)?,
            dice_roll_delay: Duration::from_millis(parse_or(
                &lookup,
                "DICE_ROLL_DELAY_MS",
                DEFAULT_DICE_ROLL_DELAY_MS,
            )?),
            cookie_secure: lookup("COOKIE_SECURE")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(false),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Whole seconds, rejecting zero.
fn nonzero_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parse_or(lookup, key, default)? {
        0 => Err(ConfigError::Invalid { key, value: "0".to_owned() }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
