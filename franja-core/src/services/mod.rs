//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod encryption;
pub mod extraction;
pub mod logging;
pub mod migration;
pub mod pool;
pub mod query;
pub mod report;
mod vault;

pub use extraction::{ExtractionService, RunContext, RunHandle, RunRequest};
pub use logging::{EntryPoint, EventCount, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use pool::{ConnectionPool, PoolOptions, PoolStatus, PooledConnection};
pub use query::RangePolicy;
pub use report::{PreparedReport, ReportMeta};
pub use vault::{CredentialVault, VaultOptions};
