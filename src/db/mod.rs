//! Database access: the SQL capability, connection bootstrap, patches, Redis.

pub mod connection;
pub mod executor;
pub mod patch;
pub mod redis_store;

pub use connection::{create_pool, lenient_connect, prepare_database, reset_database, run_sql_section};
pub use executor::{conflict_columns, Database, PgDatabase, SqlExecutor, Transaction};
pub use patch::{run_patch, Patch, PatchContext, PatchFn, PatchRegistry};
pub use redis_store::flush_redis;
