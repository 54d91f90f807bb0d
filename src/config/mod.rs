//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
    /// Allowed client origins for CORS, comma separated (`*` for any)
    pub client_origin: String,

    /// Win threshold when a create request does not name one
    pub default_win_points: u32,
    /// Largest win threshold accepted at creation
    pub max_win_points: u32,
    /// How long a room may sit with no members before it is reaped
    pub room_grace: Duration,
    /// Inbound WebSocket messages per second per connection
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let default_win_points = parse_or(&var, "DEFAULT_WIN_POINTS", 5)?;
        let max_win_points = parse_or(&var, "MAX_WIN_POINTS", 21)?;
        if default_win_points == 0 || default_win_points > max_win_points {
            return Err(ConfigError::Invalid("DEFAULT_WIN_POINTS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            jwt_secret: var("AUTH_JWT_SECRET")
                .filter(|secret| !secret.is_empty())
                .ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?,
            client_origin: var("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),

            default_win_points,
            max_win_points,
            room_grace: Duration::from_secs(parse_or(&var, "ROOM_GRACE_SECS", 30)?),
            input_rate_limit: parse_or(&var, "INPUT_RATE_LIMIT", 120)?,
        })
    }

    /// Resolve a requested win threshold against the configured bounds
    pub fn win_points(&self, requested: Option<u32>) -> Result<u32, String> {
        match requested {
            None => Ok(self.default_win_points),
            Some(points) if (1..=self.max_win_points).contains(&points) => Ok(points),
            Some(points) => Err(format!(
                "win_points must be between 1 and {} (got {})",
                self.max_win_points, points
            )),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
impl Config {
    /// Defaults with a fixed secret, for router and handler tests
    pub fn for_tests(secret: &str) -> Self {
        let secret = secret.to_string();
        Self::from_lookup(move |key| (key == "AUTH_JWT_SECRET").then(|| secret.clone()))
            .unwrap_or_else(|err| panic!("test config: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("AUTH_JWT_SECRET", "x")]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.client_origin, "*");
        assert_eq!(config.default_win_points, 5);
        assert_eq!(config.max_win_points, 21);
        assert_eq!(config.room_grace, Duration::from_secs(30));
        assert_eq!(config.input_rate_limit, 120);
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = load(&[
            ("AUTH_JWT_SECRET", "x"),
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:1"),
        ])
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn secret_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("AUTH_JWT_SECRET"))));
        assert!(matches!(
            load(&[("AUTH_JWT_SECRET", "x"), ("MAX_WIN_POINTS", "many")]),
            Err(ConfigError::Invalid("MAX_WIN_POINTS"))
        ));
    }

    #[test]
    fn win_points_bounds() {
        let config = load(&[("AUTH_JWT_SECRET", "x")]).unwrap();
        assert_eq!(config.win_points(None), Ok(5));
        assert_eq!(config.win_points(Some(11)), Ok(11));
        assert!(config.win_points(Some(0)).is_err());
        assert!(config.win_points(Some(22)).is_err());
    }
}
