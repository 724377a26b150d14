//! Database access layer.
//!
//! Standardized pool creation, transient-failure retry, and the
//! embedded schema migrations for the settlement database.

pub mod pool;
pub mod retry;

pub use pool::{create_default_pool, create_pool, DbPoolConfig};
pub use retry::execute_with_retry;

/// Embedded migrations, applied with `MIGRATOR.run(&pool).await`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
