//! Source database port
//!
//! Defines how the core reaches the accounting database. The query engine
//! owns the SQL text; adapters only bind the validated date window and
//! stream rows back.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::result::Error;
use crate::domain::{ConnectionConfig, ValidatedRange};

/// A named, read-only SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    /// Logical name used in error messages, e.g. "invoice extraction"
    pub name: &'static str,
    /// Parameterized SQL; `$1`/`$2` are the window start and end
    pub sql: &'static str,
}

/// Backend failure as reported by an adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Query(String),
}

impl SourceError {
    /// Whether the connection that produced this error is still usable
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, SourceError::Network(_) | SourceError::Timeout(_))
    }

    /// Convert into a core error; query failures are tagged with the statement name
    pub fn into_error(self, statement: &'static str) -> Error {
        match self {
            SourceError::Authentication(msg) => Error::Authentication(msg),
            SourceError::Network(msg) => Error::Network(msg),
            SourceError::Timeout(msg) => Error::Timeout(msg),
            SourceError::Query(msg) => Error::query(statement, msg),
        }
    }
}

/// Invoice line as it comes off the wire, before normalization
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct RawInvoiceRow {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub identification: Option<String>,
    pub cost_center_code: Option<String>,
    pub account_code: Option<String>,
    pub amount: Option<Decimal>,
    pub account_nature: Option<String>,
}

/// Counterparty as it comes off the wire, before normalization
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct RawPartnerRow {
    pub name: Option<String>,
    pub identification_type: Option<String>,
    pub identification_number: Option<String>,
    pub is_company: Option<bool>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<String>,
}

/// An open connection to the accounting database
///
/// Row streams are finite, single-pass, and borrow the connection until
/// they are dropped.
#[async_trait]
pub trait SourceConnection: Send + 'static {
    /// Trivial round trip used as a liveness check
    async fn ping(&mut self) -> Result<(), SourceError>;

    /// Server version string
    async fn server_version(&mut self) -> Result<String, SourceError>;

    /// Names returned by a table-existence query
    async fn table_names(&mut self, statement: &Statement) -> Result<Vec<String>, SourceError>;

    /// Stream invoice lines for the window
    fn invoice_rows<'c>(
        &'c mut self,
        statement: &Statement,
        range: &ValidatedRange,
    ) -> BoxStream<'c, Result<RawInvoiceRow, SourceError>>;

    /// Stream counterparties for the window
    fn partner_rows<'c>(
        &'c mut self,
        statement: &Statement,
        range: &ValidatedRange,
    ) -> BoxStream<'c, Result<RawPartnerRow, SourceError>>;
}

/// Opens connections to the accounting database
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: SourceConnection;

    /// Open a new connection using the given parameters
    ///
    /// The config is borrowed for the duration of the attempt only.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection, SourceError>;
}
