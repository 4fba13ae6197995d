//! Settings shared by the relational backends.

use crate::error::{Result, StoreError};
use std::fmt;
use std::time::Duration;

/// Table used when none (or an unusable name) is configured.
pub const DEFAULT_TABLE: &str = "watched_status";

/// Port used when a server port is not configured.
pub const DEFAULT_SERVER_PORT: u16 = 3306;

/// Reduce `name` to ASCII alphanumerics and underscores.
///
/// Falls back to [`DEFAULT_TABLE`] if nothing is left.
pub fn sanitize_table_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if safe.is_empty() {
        return DEFAULT_TABLE.to_string();
    }
    if safe != name {
        tracing::warn!(from = %name, to = %safe, "adjusted table name");
    }
    safe
}

/// Connection settings for a MariaDB/MySQL server.
#[derive(Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
    pub connect_timeout: Duration,
}

impl ServerConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SERVER_PORT,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            table: DEFAULT_TABLE.to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Host, database and user are required; the password may be empty.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("host", &self.host),
            ("database", &self.database),
            ("user", &self.user),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Config(format!(
                "MariaDB settings incomplete, missing: {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("table", &self.table)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
