//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod credentials;
pub mod source;

pub use credentials::CredentialSource;
pub use source::{
    Connector, RawInvoiceRow, RawPartnerRow, SourceConnection, SourceError, Statement,
};
