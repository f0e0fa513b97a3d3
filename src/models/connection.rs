//! Connection-related data models.
//!
//! This module defines types for database connection configuration, identity and state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default maximum number of failed connect attempts per identity.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 1;

/// Default number of seconds to wait before reconnecting.
pub const DEFAULT_RECONNECT_WAIT_SECS: u64 = 10;

/// Default logging level recorded for a connection.
pub const DEFAULT_LOGGING_LEVEL: &str = "info";

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A write-only secret. Never printed in clear text.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked representation for user-facing text.
    pub fn masked(&self) -> &'static str {
        if self.0.is_empty() { "" } else { "******" }
    }

    /// The clear-text value, for handing to a driver.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Password({})", self.masked())
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Cache key for connections and facades: URL, user and a digest of the password.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    url: String,
    user: String,
    password_digest: [u8; 32],
}

impl ConnectionIdentity {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: &Password) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password_digest: password.digest(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl std::fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("url", &mask_url(&self.url))
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Settings of one logical database endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub url: String,
    pub user: String,
    pub password: Password,
    pub auto_commit: bool,
    pub max_connect_attempts: u32,
    pub reconnect_wait_secs: u64,
    pub connect_on_startup: bool,
    pub logging_level: String,
}

impl ConnectionSettings {
    /// Settings with the default retry policy for the given endpoint.
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: Password) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password,
            auto_commit: true,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            reconnect_wait_secs: DEFAULT_RECONNECT_WAIT_SECS,
            connect_on_startup: false,
            logging_level: DEFAULT_LOGGING_LEVEL.to_string(),
        }
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    pub fn with_reconnect_wait_secs(mut self, secs: u64) -> Self {
        self.reconnect_wait_secs = secs;
        self
    }

    pub fn with_connect_on_startup(mut self, connect: bool) -> Self {
        self.connect_on_startup = connect;
        self
    }

    pub fn with_logging_level(mut self, level: impl Into<String>) -> Self {
        self.logging_level = level.into();
        self
    }

    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::new(&self.url, &self.user, &self.password)
    }

    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_connection_string(&self.url)
    }

    /// Get a display-safe version of the URL (credentials masked).
    pub fn masked_url(&self) -> String {
        mask_url(&self.url)
    }
}

/// The persisted tuple describing a connection in the history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, with = "obfuscated")]
    pub password: Password,
    #[serde(default = "default_logging_level")]
    pub logging_level: String,
    #[serde(default)]
    pub connect_on_startup: bool,
    #[serde(default = "default_true")]
    pub auto_commit: bool,
}

fn default_logging_level() -> String {
    DEFAULT_LOGGING_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

impl ConnectionParameters {
    /// Parameters of the given settings.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            url: settings.url.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            logging_level: settings.logging_level.clone(),
            connect_on_startup: settings.connect_on_startup,
            auto_commit: settings.auto_commit,
        }
    }

    /// Settings for these parameters, using the default retry policy.
    pub fn to_settings(&self) -> ConnectionSettings {
        ConnectionSettings::new(&self.url, &self.user, self.password.clone())
            .with_auto_commit(self.auto_commit)
            .with_connect_on_startup(self.connect_on_startup)
            .with_logging_level(&self.logging_level)
    }

    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::new(&self.url, &self.user, &self.password)
    }
}

/// Passwords are persisted base64-obfuscated, never in clear text.
mod obfuscated {
    use super::Password;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const PREFIX: &str = "base64:";

    pub fn serialize<S>(password: &Password, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if password.is_empty() {
            return "".serialize(serializer);
        }
        format!("{}{}", PREFIX, STANDARD.encode(password.expose())).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Password, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix(PREFIX) {
            Some(encoded) => {
                let bytes = STANDARD.decode(encoded).map_err(serde::de::Error::custom)?;
                let clear = String::from_utf8(bytes).map_err(serde::de::Error::custom)?;
                Ok(Password::new(clear))
            }
            None => Ok(Password::new(s)),
        }
    }
}

/// Mask a password embedded in a connection URL.
pub fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}

/// Short form of a URL: scheme and domain suffix stripped, e.g. `localhost/mydb`.
pub fn short_url(raw: &str) -> String {
    let without_scheme = match raw.find("://") {
        Some(pos) => &raw[pos + 3..],
        None => raw.split_once(':').map_or(raw, |(_, rest)| rest),
    };
    let without_credentials = without_scheme
        .rsplit_once('@')
        .map_or(without_scheme, |(_, rest)| rest);
    match without_credentials.split_once('/') {
        Some((host, path)) => {
            let host = host.split(['.', ':']).next().unwrap_or(host);
            format!("{}/{}", host, path)
        }
        None => without_credentials.to_string(),
    }
}

/// Kind of connection state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEventKind {
    Connect,
    Disconnect,
}

/// Change event fired by a connection to its listeners.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    /// Instance id of the firing connection.
    pub connection_id: Uuid,
    pub identity: ConnectionIdentity,
}

/// Connection information for diagnostics (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: Uuid,
    /// Short display form, e.g. `dbhost/mydb`.
    pub name: String,
    pub url: String,
    pub user: String,
    pub database_type: Option<DatabaseType>,
    pub connected: bool,
    pub auto_commit: bool,
    pub failed_attempts: u32,
    pub listeners: usize,
    pub open_statements: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}
