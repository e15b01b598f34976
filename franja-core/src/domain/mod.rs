//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod connection;
pub mod date_range;
pub mod encryption;
mod extraction;
mod invoice;
mod partner;
pub mod result;

pub use connection::{
    ConnectionConfig, ConnectionTestResult, DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS,
    MAX_POOL_SIZE, MAX_TIMEOUT_SECS,
};
pub use date_range::{DateSelector, ValidatedRange};
pub use encryption::{Argon2Params, KeyMaterial, SealedSecret};
pub use extraction::{
    ExtractionFailure, ExtractionResult, RowCounts, RunEvent, RunRecord, RunState,
};
pub use invoice::{normalize_amount, AccountNature, InvoiceRecord};
pub use partner::{PartnerRecord, PartnerType};
pub use result::ErrorKind;
