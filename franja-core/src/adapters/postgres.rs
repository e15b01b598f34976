//! PostgreSQL source adapter
//!
//! Single connections opened with sqlx; pooling is handled by the core.
//! Every session is read with a server-side statement timeout so a slow
//! query cannot hold the worker past the configured limit.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;

use crate::domain::{ConnectionConfig, ValidatedRange};
use crate::ports::{
    Connector, RawInvoiceRow, RawPartnerRow, SourceConnection, SourceError, Statement,
};

const APPLICATION_NAME: &str = "franja";

/// Map a driver error onto the port's failure classes
pub fn classify(error: sqlx::Error) -> SourceError {
    match error {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = db.message().to_string();
            match code.as_str() {
                "28P01" | "28000" => SourceError::Authentication(message),
                "3D000" => SourceError::Authentication(message),
                "57014" => SourceError::Timeout("statement timeout exceeded".to_string()),
                c if c.starts_with("08") => SourceError::Network(message),
                c if c.starts_with("57P") => SourceError::Network(message),
                _ => SourceError::Query(message),
            }
        }
        sqlx::Error::Io(e) => SourceError::Network(e.to_string()),
        sqlx::Error::Tls(e) => SourceError::Network(format!("TLS: {}", e)),
        sqlx::Error::Protocol(msg) => SourceError::Network(msg),
        sqlx::Error::PoolTimedOut => SourceError::Timeout("connection timed out".to_string()),
        other => SourceError::Query(other.to_string()),
    }
}

/// Opens PostgreSQL connections
#[derive(Debug, Clone)]
pub struct PgConnector {
    statement_timeout: Duration,
}

impl PgConnector {
    pub fn new(statement_timeout: Duration) -> Self {
        Self { statement_timeout }
    }

    pub fn connect_options(&self, config: &ConnectionConfig) -> PgConnectOptions {
        use secrecy::ExposeSecret;

        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(config.password.expose_secret())
            .application_name(APPLICATION_NAME)
            .options([(
                "statement_timeout",
                self.statement_timeout.as_millis().to_string(),
            )])
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgSourceConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<PgSourceConnection, SourceError> {
        let options = self.connect_options(config);
        let conn = PgConnection::connect_with(&options).await.map_err(classify)?;
        tracing::debug!(host = %config.host, port = config.port, "postgres connection opened");
        Ok(PgSourceConnection { conn })
    }
}

/// An open PostgreSQL session
pub struct PgSourceConnection {
    conn: PgConnection,
}

#[async_trait]
impl SourceConnection for PgSourceConnection {
    async fn ping(&mut self) -> Result<(), SourceError> {
        self.conn.ping().await.map_err(classify)
    }

    async fn server_version(&mut self) -> Result<String, SourceError> {
        sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn table_names(&mut self, statement: &Statement) -> Result<Vec<String>, SourceError> {
        sqlx::query_scalar::<_, String>(statement.sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(classify)
    }

    fn invoice_rows<'c>(
        &'c mut self,
        statement: &Statement,
        range: &ValidatedRange,
    ) -> BoxStream<'c, Result<RawInvoiceRow, SourceError>> {
        sqlx::query_as::<_, RawInvoiceRow>(statement.sql)
            .bind(range.start())
            .bind(range.end())
            .fetch(&mut self.conn)
            .map(|row| row.map_err(classify))
            .boxed()
    }

    fn partner_rows<'c>(
        &'c mut self,
        statement: &Statement,
        range: &ValidatedRange,
    ) -> BoxStream<'c, Result<RawPartnerRow, SourceError>> {
        sqlx::query_as::<_, RawPartnerRow>(statement.sql)
            .bind(range.start())
            .bind(range.end())
            .fetch(&mut self.conn)
            .map(|row| row.map_err(classify))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_errors_are_network() {
        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let classified = classify(err);
        assert!(matches!(classified, SourceError::Network(_)));
        assert!(classified.is_connection_broken());
    }

    #[test]
    fn test_pool_timeout_is_timeout() {
        assert!(matches!(
            classify(sqlx::Error::PoolTimedOut),
            SourceError::Timeout(_)
        ));
    }

    #[test]
    fn test_decode_errors_are_query_errors() {
        let err = sqlx::Error::ColumnNotFound("amount".to_string());
        assert!(matches!(classify(err), SourceError::Query(_)));
    }

    #[test]
    fn test_connect_options() {
        let connector = PgConnector::new(Duration::from_secs(9));
        let config = ConnectionConfig::new("db.internal", 5433, "odoo17", "reader", "pw");
        let options = connector.connect_options(&config);
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("odoo17"));
        assert_eq!(options.get_username(), "reader");
        assert_eq!(options.get_application_name(), Some("franja"));
        assert!(options
            .get_options()
            .is_some_and(|o| o.contains("statement_timeout=9000")));
    }
}
