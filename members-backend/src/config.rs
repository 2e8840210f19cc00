use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub database_url: String,
    pub uploads_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source; unset or blank values
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "PORT",
                message: format!("{} ({})", raw, e),
            })?,
            None => 8080,
        };

        Ok(Self {
            port,
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            database_url: get("DATABASE_URL").unwrap_or_else(|| "./.db/members.db".to_string()),
            uploads_dir: get("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.database_url, "./.db/members.db");
        assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "3000"),
            ("BIND_ADDRESS", "127.0.0.1"),
            ("DATABASE_URL", ":memory:"),
            ("UPLOADS_DIR", "/var/lib/members/uploads"),
        ])
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.database_url, ":memory:");
        assert_eq!(config.uploads_dir, PathBuf::from("/var/lib/members/uploads"));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("PORT", "  "), ("DATABASE_URL", "")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url, "./.db/members.db");
    }

    #[test]
    fn test_invalid_port() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(config_from(&[("PORT", "70000")]).is_err());
    }
}
