//! Host application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    /// Display name shown on the success and cancel pages
    pub app_name: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Logging
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            app_name: env::var("APP_NAME")
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "Paymount".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: match env::var("DATABASE_MAX_CONNECTIONS") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", raw))?,
                Err(_) => 10,
            },

            // Logging
            log_json: env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn cleanup_config() {
        for key in [
            "BIND_ADDRESS",
            "APP_NAME",
            "DATABASE_URL",
            "DATABASE_MAX_CONNECTIONS",
            "LOG_FORMAT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_config_from_env() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();

        // === Missing database url ===
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));

        // === Defaults ===
        env::set_var("DATABASE_URL", "postgres://test");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.app_name, "Paymount");
        assert_eq!(config.database_max_connections, 10);
        assert!(!config.log_json);

        // === Overrides ===
        env::set_var("APP_NAME", "Acme");
        env::set_var("DATABASE_MAX_CONNECTIONS", "25");
        env::set_var("LOG_FORMAT", "JSON");
        let config = Config::from_env().unwrap();
        assert_eq!(config.app_name, "Acme");
        assert_eq!(config.database_max_connections, 25);
        assert!(config.log_json);

        // === Invalid pool size ===
        env::set_var("DATABASE_MAX_CONNECTIONS", "lots");
        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", _))
        ));

        cleanup_config();
    }
}
