//! Optional Redis handle for the app and the `flush_redis` command.

use crate::settings::Settings;
use redis::aio::ConnectionManager;

pub async fn connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}

/// FLUSHDB on the configured Redis database. Without a redis url there is nothing to do.
pub async fn flush_redis(settings: &Settings) -> anyhow::Result<()> {
    let Some(url) = settings.redis_url.as_deref() else {
        tracing::warn!("redis_url not set, nothing to flush");
        return Ok(());
    };
    let mut con = connect(url).await?;
    let _: () = redis::cmd("FLUSHDB").query_async(&mut con).await?;
    tracing::info!("redis database flushed");
    Ok(())
}
