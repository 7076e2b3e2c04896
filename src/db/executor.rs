//! SQL-execution capability used by the BREAD layer, with a PgPool implementation.

use crate::error::DbError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgDatabaseError, PgPool, PgRow, Postgres};
use sqlx::query::Query;
use std::sync::OnceLock;

/// Run parameterized statements: no rows, a scalar, one row, many rows.
/// Rows come back as JSON objects keyed by column name.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Rows affected.
    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, DbError>;
    /// First column of the first row; `None` when there is no row.
    async fn fetch_value(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError>;
    async fn fetch_row(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError>;
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, DbError>;
}

/// An executor whose statements only persist once `commit` is called.
/// Dropping it without committing rolls back.
#[async_trait]
pub trait Transaction: SqlExecutor {
    async fn commit(&mut self) -> Result<(), DbError>;
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn executor(&self) -> Result<Box<dyn SqlExecutor>, DbError>;
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;
    async fn close(&self) {}
}

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        PgDatabase { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn executor(&self) -> Result<Box<dyn SqlExecutor>, DbError> {
        Ok(Box::new(PgPoolExecutor {
            pool: self.pool.clone(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct PgPoolExecutor {
    pool: PgPool,
}

struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, DbError> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Decode("transaction already committed".into()))
    }
}

fn bind(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

#[async_trait]
impl SqlExecutor for PgPoolExecutor {
    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, DbError> {
        let done = bind(q).execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(done.rows_affected())
    }

    async fn fetch_value(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError> {
        let row = bind(q).fetch_optional(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(row.as_ref().map(first_cell))
    }

    async fn fetch_row(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError> {
        let row = bind(q).fetch_optional(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(row.as_ref().map(row_to_json))
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, DbError> {
        let rows = bind(q).fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[async_trait]
impl SqlExecutor for PgTransaction {
    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, DbError> {
        let tx = self.conn()?;
        let done = bind(q).execute(&mut **tx).await.map_err(map_sqlx_error)?;
        Ok(done.rows_affected())
    }

    async fn fetch_value(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError> {
        let tx = self.conn()?;
        let row = bind(q).fetch_optional(&mut **tx).await.map_err(map_sqlx_error)?;
        Ok(row.as_ref().map(first_cell))
    }

    async fn fetch_row(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError> {
        let tx = self.conn()?;
        let row = bind(q).fetch_optional(&mut **tx).await.map_err(map_sqlx_error)?;
        Ok(row.as_ref().map(row_to_json))
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, DbError> {
        let tx = self.conn()?;
        let rows = bind(q).fetch_all(&mut **tx).await.map_err(map_sqlx_error)?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(&mut self) -> Result<(), DbError> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.map_err(map_sqlx_error),
            None => Err(DbError::Decode("transaction already committed".into())),
        }
    }
}

fn key_columns() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((.+?)\)").expect("static regex"))
}

/// Columns named in a unique-violation detail such as
/// `Key (org, slug)=(1, x) already exists.`
pub fn conflict_columns(detail: &str) -> Vec<String> {
    key_columns()
        .captures(detail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split(", ").map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn map_sqlx_error(e: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let detail = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .unwrap_or("");
            return DbError::UniqueViolation {
                columns: conflict_columns(detail),
            };
        }
    }
    DbError::Sqlx(e)
}

fn first_cell(row: &PgRow) -> Value {
    use sqlx::{Column, Row};
    match row.columns().first() {
        Some(col) => cell_to_value(row, col.name()),
        None => Value::Null,
    }
}

pub(crate) fn row_to_json(row: &PgRow) -> Value {
    use sqlx::{Column, Row};
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_columns_from_detail() {
        assert_eq!(conflict_columns("Key (slug)=(apple) already exists."), vec!["slug"]);
        assert_eq!(
            conflict_columns("Key (org, slug)=(1, apple) already exists."),
            vec!["org", "slug"]
        );
        assert!(conflict_columns("").is_empty());
    }
}
