//! Connection parameters for the source database

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

const MAX_HOST_LEN: usize = 255;
pub const MAX_POOL_SIZE: u32 = 100;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Non-empty and without surrounding whitespace
fn check_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("Missing or empty field: {}", field)));
    }
    if value.trim() != value {
        return Err(Error::validation(format!(
            "Field {} has leading or trailing spaces",
            field
        )));
    }
    Ok(())
}

/// Connection parameters for the accounting database
///
/// The password is held as a [`SecretString`]: it is redacted from `Debug`
/// output and zeroed on drop. Only the credential vault persists it, and
/// only in encrypted form.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: SecretString,
    pub pool_size: u32,
    pub timeout_secs: u64,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: SecretString::new(password.into()),
            pool_size: DEFAULT_POOL_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Check that every field is usable before saving or connecting
    pub fn validate(&self) -> Result<()> {
        check_text(&self.host, "host")?;
        if self.host.len() > MAX_HOST_LEN {
            return Err(Error::validation("Invalid host format"));
        }
        if self.port == 0 {
            return Err(Error::validation("Port must be between 1 and 65535"));
        }
        check_text(&self.database, "database")?;
        check_text(&self.username, "username")?;
        if self.password.expose_secret().is_empty() {
            return Err(Error::validation("Missing or empty field: password"));
        }
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(Error::validation(format!(
                "Pool size must be between 1 and {}",
                MAX_POOL_SIZE
            )));
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::validation(format!(
                "Timeout must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )));
        }
        Ok(())
    }

    /// Field-by-field equality, including the plaintext password
    pub fn same_as(&self, other: &ConnectionConfig) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.database == other.database
            && self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
            && self.pool_size == other.pool_size
            && self.timeout_secs == other.timeout_secs
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("pool_size", &self.pool_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Outcome of a connectivity test, rendered by the caller as-is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub ok: bool,
    pub message: String,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl From<Result<String>> for ConnectionTestResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::fail(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionConfig {
        ConnectionConfig::new("db.example.com", 5432, "odoo", "reader", "s3cret")
    }

    #[test]
    fn test_valid_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut config = sample();
        config.host = "  ".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let mut config = sample();
        config.database = String::new();
        assert!(config.validate().is_err());

        let config = ConnectionConfig::new("h", 5432, "d", "u", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_padded_fields_rejected() {
        let config = ConnectionConfig::new(" db.host ", 5432, "odoo17", "reader", "pw");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("host"));

        let config = ConnectionConfig::new("db.host", 5432, "odoo17 ", "reader", "pw");
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let config = ConnectionConfig::new("db.host", 5432, "odoo17", " reader", "pw");
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_pool_and_timeout_bounds() {
        assert!(sample().with_pool_size(MAX_POOL_SIZE).validate().is_ok());
        assert!(sample().with_pool_size(MAX_POOL_SIZE + 1).validate().is_err());
        assert!(sample().with_pool_size(3_000_000_000).validate().is_err());
        assert!(sample().with_pool_size(0).validate().is_err());

        assert!(sample().with_timeout_secs(MAX_TIMEOUT_SECS).validate().is_ok());
        assert!(sample().with_timeout_secs(u64::MAX).validate().is_err());
        assert!(sample().with_timeout_secs(0).validate().is_err());
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut config = sample();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_test_result_from_result() {
        let ok: Result<String> = Ok("Connection successful".to_string());
        assert!(ConnectionTestResult::from(ok).ok);

        let err: Result<String> = Err(Error::Network("connection refused".into()));
        let result = ConnectionTestResult::from(err);
        assert!(!result.ok);
        assert!(result.message.contains("connection refused"));
    }
}
