//! Config database migrations - embedded SQL files
//!
//! Each migration is a tuple of (name, sql_content), applied in order by
//! [`crate::services::MigrationService`].

/// All config database migrations, embedded at compile time.
///
/// When adding a new migration, create `NNN_description.sql` and add it here in order.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
