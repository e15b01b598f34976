//! Credential vault
//!
//! Persists the one active [`ConnectionConfig`] in the config store with its
//! password sealed by [`super::encryption`]. The salt is generated on first
//! save and kept next to the ciphertext.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::adapters::duckdb::{ConfigStore, StoredConnection};
use crate::domain::result::{Error, Result};
use crate::domain::{Argon2Params, ConnectionConfig, ConnectionTestResult, KeyMaterial};
use crate::ports::{Connector, CredentialSource, SourceConnection};

use super::encryption::{self, DerivedKey};

/// Built-in passphrase; the per-installation salt makes derived keys unique
const DEFAULT_PASSPHRASE: &str = "franja.vault.v1";

/// Longest server version string shown in a test result
const MAX_VERSION_LEN: usize = 50;

/// Key derivation options for the vault
#[derive(Clone)]
pub struct VaultOptions {
    pub passphrase: SecretString,
    /// Parameters used when the installation has no key material yet
    pub argon2: Argon2Params,
}

impl Default for VaultOptions {
    fn default() -> Self {
        let passphrase = std::env::var("FRANJA_VAULT_PASSPHRASE")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PASSPHRASE.to_string());
        Self {
            passphrase: SecretString::new(passphrase),
            argon2: Argon2Params::default(),
        }
    }
}

impl VaultOptions {
    pub fn with_argon2(mut self, argon2: Argon2Params) -> Self {
        self.argon2 = argon2;
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = SecretString::new(passphrase.into());
        self
    }
}

/// Encrypted, single-row store for the connection configuration
pub struct CredentialVault {
    store: Arc<ConfigStore>,
    options: VaultOptions,
    key: Mutex<Option<Arc<DerivedKey>>>,
}

impl CredentialVault {
    pub fn new(store: Arc<ConfigStore>, options: VaultOptions) -> Self {
        Self {
            store,
            options,
            key: Mutex::new(None),
        }
    }

    /// Derive (once) the key for this installation, creating the salt if needed
    fn key(&self, create: bool) -> Result<Arc<DerivedKey>> {
        let mut cached = self
            .key
            .lock()
            .map_err(|e| Error::persistence(format!("Lock poisoned: {}", e)))?;
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let material = match self.store.load_key_material()? {
            Some(material) => material,
            None if create => {
                let salt = STANDARD.encode(encryption::generate_salt());
                let material = KeyMaterial::new(salt, self.options.argon2);
                self.store.save_key_material(&material)?;
                // Another process may have won the race; use what was stored.
                self.store.load_key_material()?.unwrap_or(material)
            }
            None => {
                return Err(Error::Decryption(
                    "Key material is missing; reconfigure the connection".to_string(),
                ))
            }
        };

        let salt = STANDARD
            .decode(&material.salt)
            .map_err(|e| Error::Decryption(format!("Invalid salt: {}", e)))?;
        let key = Arc::new(encryption::derive_key(
            self.options.passphrase.expose_secret(),
            &salt,
            &material.argon2_params,
        )?);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    /// Validate, encrypt and persist, replacing any previous configuration
    pub fn save(&self, config: &ConnectionConfig) -> Result<()> {
        config.validate()?;
        let key = self.key(true)?;
        let password = encryption::seal(config.password.expose_secret(), &key)?;

        self.store.save_connection(&StoredConnection {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            username: config.username.clone(),
            password,
            pool_size: config.pool_size,
            timeout_secs: config.timeout_secs,
        })?;
        tracing::info!(host = %config.host, port = config.port, "connection config saved");
        Ok(())
    }

    /// Load and decrypt the saved configuration
    pub fn load(&self) -> Result<ConnectionConfig> {
        let stored = self.store.load_connection()?.ok_or(Error::NotConfigured)?;
        let key = self.key(false)?;
        let password = encryption::open(&stored.password, &key)?;

        Ok(ConnectionConfig {
            host: stored.host,
            port: stored.port,
            database: stored.database,
            username: stored.username,
            password: SecretString::new(password),
            pool_size: stored.pool_size,
            timeout_secs: stored.timeout_secs,
        })
    }

    pub fn is_configured(&self) -> Result<bool> {
        Ok(self.store.load_connection()?.is_some())
    }

    /// Forget the saved configuration
    pub fn clear(&self) -> Result<bool> {
        self.store.clear_connection()
    }

    /// Try a short-lived connection without persisting anything
    ///
    /// Never fails: every problem is reported in the returned result.
    pub async fn test<C: Connector>(connector: &C, config: &ConnectionConfig) -> ConnectionTestResult {
        ConnectionTestResult::from(Self::probe(connector, config).await)
    }

    async fn probe<C: Connector>(connector: &C, config: &ConnectionConfig) -> Result<String> {
        config.validate()?;
        let timeout = std::time::Duration::from_secs(config.timeout_secs);
        let started = Instant::now();

        let attempt = async {
            let mut conn = connector.connect(config).await?;
            conn.server_version().await
        };
        let version = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result.map_err(|e| e.into_error("connection test"))?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "no response within {}s",
                    config.timeout_secs
                )))
            }
        };
        let elapsed = started.elapsed().as_secs_f64();

        let version: String = version.chars().take(MAX_VERSION_LEN).collect();
        tracing::debug!(elapsed_secs = elapsed, "connection test succeeded");
        Ok(format!(
            "Connection successful. Server: {} (response time: {:.2}s)",
            version, elapsed
        ))
    }
}

impl CredentialSource for CredentialVault {
    fn credentials(&self) -> Result<ConnectionConfig> {
        self.load()
    }
}
