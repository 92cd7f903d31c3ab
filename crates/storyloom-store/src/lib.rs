//! Storyloom Store — infrastructure adapters.
//!
//! [`pg_store::PgStore`] implements the repository ports on `PostgreSQL`,
//! [`redis_cache::RedisCache`] implements the cache port on Redis.

pub mod pg_store;
pub mod redis_cache;
mod rows;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
