//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - PostgreSQL (sqlx) for the source database
//! - In-memory demo ledger for the source database in demo mode and tests
//! - DuckDB for the local config store and run history
//! - OOXML writer for the spreadsheet reports

pub mod demo;
pub mod duckdb;
pub mod postgres;
pub mod xlsx;
