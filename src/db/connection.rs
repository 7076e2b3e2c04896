//! Connecting to Postgres and (re)creating the application database.

use crate::error::DbError;
use crate::settings::Settings;
use regex::Regex;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, PgConnection};
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::time::Duration;

const CONNECT_RETRIES: u32 = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_secs(1);

const DROP_CONNECTIONS: &str = "SELECT pg_terminate_backend(pg_stat_activity.pid)
FROM pg_stat_activity
WHERE pg_stat_activity.datname = $1 AND pid <> pg_backend_pid()";

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn connect_options(settings: &Settings, with_db: bool) -> Result<PgConnectOptions, DbError> {
    let dsn = if with_db {
        settings.pg_dsn.clone()
    } else {
        settings.pg_server_dsn()
    };
    Ok(PgConnectOptions::from_str(&dsn)?)
}

/// Connect, retrying while the server comes up: 9 attempts, 2s each, 1s apart.
pub async fn lenient_connect(settings: &Settings, with_db: bool) -> Result<PgConnection, DbError> {
    let opts = connect_options(settings, with_db)?;
    let mut retry = CONNECT_RETRIES;
    loop {
        let err = match tokio::time::timeout(CONNECT_TIMEOUT, opts.connect()).await {
            Ok(Ok(mut conn)) => {
                let version: String = sqlx::query_scalar("SELECT version()").fetch_one(&mut conn).await?;
                if retry == CONNECT_RETRIES {
                    tracing::debug!(%version, "pg connection successful");
                } else {
                    tracing::info!(%version, "pg connection successful");
                }
                return Ok(conn);
            }
            Ok(Err(e)) => DbError::Sqlx(e),
            Err(_) => DbError::Sqlx(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection attempt timed out",
            ))),
        };
        if retry == 0 {
            return Err(err);
        }
        tracing::warn!(error = %err, retries = retry, "pg temporary connection error");
        retry -= 1;
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Pool for the application database; the first connection is made leniently
/// so the process can start while Postgres is still booting.
pub async fn create_pool(settings: &Settings) -> Result<PgPool, DbError> {
    lenient_connect(settings, true).await?.close().await?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect_with(connect_options(settings, true)?)
        .await?;
    Ok(pool)
}

/// (Re)create the database and run `settings.sql`. Returns whether the schema was (re)created.
pub async fn prepare_database(settings: &Settings, overwrite_existing: bool) -> anyhow::Result<bool> {
    let db_name = settings.pg_name()?;
    if settings.pg_db_exists {
        let mut conn = lenient_connect(settings, true).await?;
        let tables: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM information_schema.tables WHERE table_schema='public'",
        )
        .fetch_one(&mut conn)
        .await?;
        conn.close().await?;
        tracing::info!(tables, "existing tables");
        if tables > 0 {
            if overwrite_existing {
                tracing::debug!("database already exists...");
            } else {
                tracing::debug!("database already exists ✓");
                return Ok(false);
            }
        }
    } else {
        let mut conn = lenient_connect(settings, false).await?;
        let created = create_database(&mut conn, &db_name, overwrite_existing).await;
        conn.close().await?;
        if !created? {
            return Ok(false);
        }
    }

    let sql = settings.sql()?;
    let mut conn = lenient_connect(settings, true).await?;
    tracing::debug!("creating tables from model definition...");
    let mut tx = conn.begin().await?;
    let script = format!("DROP SCHEMA public CASCADE;\nCREATE SCHEMA public;\n{}", sql);
    sqlx::raw_sql(&script).execute(&mut *tx).await?;
    tx.commit().await?;
    conn.close().await?;
    tracing::info!("database successfully setup ✓");
    Ok(true)
}

/// Returns false when the database already existed and is being kept.
async fn create_database(conn: &mut PgConnection, db_name: &str, overwrite_existing: bool) -> anyhow::Result<bool> {
    if !overwrite_existing {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&mut *conn)
            .await?;
        if exists {
            return Ok(false);
        }
    }

    sqlx::query(DROP_CONNECTIONS).bind(db_name).execute(&mut *conn).await?;
    tracing::debug!(db_name, "attempting to create database...");
    match sqlx::query(&format!("CREATE DATABASE {}", quote_ident(db_name)))
        .execute(&mut *conn)
        .await
    {
        Ok(_) => tracing::debug!("database did not exist, now created"),
        // 42P04 duplicate_database
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P04") || e.is_unique_violation() => {
            if overwrite_existing {
                tracing::debug!("database already exists...");
            } else {
                tracing::debug!("database already exists, skipping creation");
                return Ok(false);
            }
        }
        Err(e) => return Err(e.into()),
    }

    tracing::debug!("setting db timezone to utc...");
    sqlx::query(&format!("ALTER DATABASE {} SET TIMEZONE TO 'UTC'", quote_ident(db_name)))
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

pub const CONFIRM_RESET_ENV: &str = "CONFIRM_DATABASE_RESET";

/// Whether a reset was confirmed through the environment or by answering `y` on `input`.
pub fn confirm_reset(env_value: Option<&str>, input: &mut impl BufRead, output: &mut impl Write) -> bool {
    if env_value == Some("confirm") {
        return true;
    }
    let _ = write!(output, "Confirm database reset? [yN] ");
    let _ = output.flush();
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim_end_matches(['\r', '\n']) == "y"
}

/// Drop and recreate the database after confirmation. Returns the exit code.
pub async fn reset_database(settings: &Settings) -> anyhow::Result<i32> {
    let env_value = std::env::var(CONFIRM_RESET_ENV).ok();
    let confirmed = confirm_reset(
        env_value.as_deref(),
        &mut std::io::stdin().lock(),
        &mut std::io::stdout(),
    );
    if !confirmed {
        println!("cancelling");
        return Ok(0);
    }
    println!("resetting database...");
    prepare_database(settings, true).await?;
    println!("done.");
    Ok(0)
}

/// Extract the text between `-- { name` and `-- } name` markers.
pub fn sql_section(chunk_name: &str, sql: &str) -> Result<String, DbError> {
    let name = regex::escape(chunk_name);
    let re = Regex::new(&format!(r"(?ms)^-- *\{{+ *{name}(.*)^-- *\}}+ *{name}"))
        .map_err(|e| DbError::Decode(e.to_string()))?;
    let section = re
        .captures(sql)
        .and_then(|c| c.get(1))
        .ok_or_else(|| DbError::Decode(format!("chunk with name \"{}\" not found", chunk_name)))?;
    Ok(section.as_str().trim_matches(|c| c == ' ' || c == '\n').to_string())
}

/// Run one named section of a SQL script, e.g. a trigger block of `models.sql`.
pub async fn run_sql_section(chunk_name: &str, sql: &str, conn: &mut PgConnection) -> Result<(), DbError> {
    let section = sql_section(chunk_name, sql)?;
    sqlx::Executor::execute(conn, sqlx::raw_sql(&section)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODELS: &str = "CREATE TABLE a (id SERIAL);
-- { triggers
CREATE FUNCTION f() RETURNS trigger AS $$ BEGIN RETURN NEW; END $$ LANGUAGE plpgsql;
-- } triggers
CREATE TABLE b (id SERIAL);
";

    #[test]
    fn finds_named_section() {
        let s = sql_section("triggers", MODELS).unwrap();
        assert!(s.starts_with("CREATE FUNCTION f()"));
        assert!(s.ends_with("LANGUAGE plpgsql;"));
    }

    #[test]
    fn missing_section_is_an_error() {
        let err = sql_section("indexes", MODELS).unwrap_err();
        assert!(err.to_string().contains("chunk with name \"indexes\" not found"));
    }

    #[test]
    fn reset_confirmation() {
        let mut out = Vec::new();
        assert!(confirm_reset(Some("confirm"), &mut "".as_bytes(), &mut out));
        assert!(out.is_empty());
        assert!(confirm_reset(None, &mut "y\n".as_bytes(), &mut out));
        assert_eq!(String::from_utf8(out).unwrap(), "Confirm database reset? [yN] ");
        let mut out = Vec::new();
        assert!(!confirm_reset(None, &mut "yes\n".as_bytes(), &mut out));
        assert!(!confirm_reset(Some("nope"), &mut "\n".as_bytes(), &mut out));
    }
}
