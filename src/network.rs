//! Waiting for backing services and checking a running web server.

use crate::settings::Settings;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

const STEP: Duration = Duration::from_millis(50);
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `host:port` every 50ms until it accepts a connection or `delay` runs out.
pub async fn wait_port_open(host: &str, port: u16, delay: Duration) -> anyhow::Result<()> {
    let start = Instant::now();
    let steps = (delay.as_millis() / STEP.as_millis()).max(1);
    for _ in 0..steps {
        let step_start = Instant::now();
        match tokio::time::timeout(STEP, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => {
                tracing::debug!(
                    "connected successfully to {}:{} after {:.2}s",
                    host,
                    port,
                    start.elapsed().as_secs_f64()
                );
                return Ok(());
            }
            _ => tokio::time::sleep(STEP.saturating_sub(step_start.elapsed())).await,
        }
    }
    anyhow::bail!(
        "unable to connect to {}:{} after {:.2}s",
        host,
        port,
        start.elapsed().as_secs_f64()
    )
}

fn host_port(raw: &str, default_port: u16) -> anyhow::Result<(String, u16)> {
    let url = url::Url::parse(raw)?;
    let host = url.host_str().unwrap_or("localhost").to_string();
    Ok((host, url.port().unwrap_or(default_port)))
}

/// Wait for Postgres and (when configured) Redis. Returns the number of services checked.
pub async fn wait_for_services(settings: &Settings, delay: Duration) -> anyhow::Result<usize> {
    let mut targets = vec![host_port(&settings.pg_dsn, 5432)?];
    tracing::debug!("waiting for postgres to come up...");
    if let Some(redis_url) = &settings.redis_url {
        targets.push(host_port(redis_url, 6379)?);
        tracing::debug!("waiting for redis to come up...");
    }
    let checks = targets
        .iter()
        .map(|(host, port)| wait_port_open(host, *port, delay));
    futures::future::try_join_all(checks).await?;
    Ok(targets.len())
}

/// GET `url` and compare the status. Returns 0 on the expected status, 1 otherwise.
pub async fn check_server(url: &str, expected_status: u16) -> i32 {
    let start = Instant::now();
    let client = match reqwest::Client::builder().timeout(CHECK_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "web check error, could not build client");
            return 1;
        }
    };
    match client.get(url).send().await {
        Ok(r) if r.status().as_u16() == expected_status => {
            tracing::info!(
                "web check successful \"{}\" > {} in {:.3}s",
                url,
                expected_status,
                start.elapsed().as_secs_f64()
            );
            0
        }
        Ok(r) => {
            tracing::error!(
                "web check error, response error {} != {}, url: \"{}\"",
                r.status().as_u16(),
                expected_status,
                url
            );
            1
        }
        Err(e) => {
            tracing::error!("web check error, {}, url: \"{}\"", e, url);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn host_and_port_from_urls() {
        assert_eq!(
            host_port("postgres://postgres@db:5433/app", 5432).unwrap(),
            ("db".to_string(), 5433)
        );
        assert_eq!(
            host_port("redis://localhost/0", 6379).unwrap(),
            ("localhost".to_string(), 6379)
        );
    }

    #[tokio::test]
    async fn open_port_is_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_port_open("127.0.0.1", port, Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = wait_port_open("127.0.0.1", port, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.to_string().starts_with(&format!("unable to connect to 127.0.0.1:{}", port)));
    }

    #[tokio::test]
    async fn check_server_against_a_dead_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert_eq!(check_server(&format!("http://127.0.0.1:{}/", port), 200).await, 1);
    }
}
