//! Configuration handling for the database access layer.
//!
//! Every option can be given on the command line or through an environment
//! variable. The backend name has no default: a missing or unknown value stops
//! start-up when the [`DbContext`](crate::context::DbContext) is built.

use crate::models::{
    ConnectionSettings, DEFAULT_LOGGING_LEVEL, DEFAULT_MAX_CONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_WAIT_SECS, Password,
};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

pub const DEFAULT_URL: &str = "sqlite:db-layer.db";
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Parser, Debug, Clone)]
#[command(name = "db-layer")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Database URL (mysql://, postgres://, sqlite:)
    #[arg(long, default_value = DEFAULT_URL, env = "DB_URL")]
    pub url: String,

    /// Database user
    #[arg(long, default_value = "", env = "DB_USER")]
    pub user: String,

    /// Database password
    #[arg(long, default_value = "", env = "DB_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOGGING_LEVEL, env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Consecutive failed connects before further attempts are refused
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECT_ATTEMPTS, env = "DB_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Seconds to wait between reconnect attempts
    #[arg(long, default_value_t = DEFAULT_RECONNECT_WAIT_SECS, env = "DB_RECONNECT_WAIT")]
    pub reconnect_wait: u64,

    /// Autocommit mode
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "DB_AUTO_COMMIT")]
    pub auto_commit: bool,

    /// Connect as soon as the connection is created
    #[arg(long, env = "DB_CONNECT_ON_STARTUP")]
    pub connect_on_startup: bool,

    /// Backend implementation (generic, mysql, postgresql, sqlite)
    #[arg(long, env = "DB_BACKEND")]
    pub backend: Option<String>,

    /// JSON file holding the connection history
    #[arg(long, env = "DB_HISTORY_FILE")]
    pub history_file: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,

    /// Create or migrate the log table after connecting
    #[arg(long)]
    pub init_log_table: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user: String::new(),
            password: String::new(),
            log_level: DEFAULT_LOGGING_LEVEL.to_string(),
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            reconnect_wait: DEFAULT_RECONNECT_WAIT_SECS,
            auto_commit: true,
            connect_on_startup: false,
            backend: None,
            history_file: None,
            json_logs: false,
            init_log_table: false,
        }
    }

    /// Settings of the default connection.
    pub fn to_settings(&self) -> ConnectionSettings {
        ConnectionSettings::new(&self.url, &self.user, Password::new(&self.password))
            .with_auto_commit(self.auto_commit)
            .with_max_connect_attempts(self.max_attempts)
            .with_reconnect_wait_secs(self.reconnect_wait)
            .with_connect_on_startup(self.connect_on_startup)
            .with_logging_level(&self.log_level)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
