//! Credential source port

use crate::domain::result::Result;
use crate::domain::ConnectionConfig;

/// Supplies connection parameters at the moment a connection is opened
///
/// Implementations decrypt on every call so that no long-lived holder of a
/// plaintext secret is needed between connection attempts.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Result<ConnectionConfig>;
}

/// Fixed parameters, for callers that already hold them in memory
impl CredentialSource for ConnectionConfig {
    fn credentials(&self) -> Result<ConnectionConfig> {
        Ok(self.clone())
    }
}
