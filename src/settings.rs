//! Process settings: defaults, optional JSON file, then environment overrides.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_ENV: &str = "TOOLBOX_SETTINGS";
const DEFAULT_SETTINGS_FILE: &str = "settings.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pg_dsn: String,
    /// The database is provisioned elsewhere and must never be created here.
    pub pg_db_exists: bool,
    pub sql_path: PathBuf,
    pub redis_url: Option<String>,
    pub port: u16,
    pub max_request_size: usize,
    /// Seconds.
    pub http_client_timeout: u64,
    pub csrf_ignore_paths: Vec<String>,
    pub csrf_upload_paths: Vec<String>,
    pub csrf_cross_origin_paths: Vec<String>,
    pub cross_origin_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            pg_dsn: "postgres://postgres@localhost:5432/app".into(),
            pg_db_exists: false,
            sql_path: PathBuf::from("models.sql"),
            redis_url: None,
            port: 8000,
            max_request_size: 10 * 1024 * 1024,
            http_client_timeout: 10,
            csrf_ignore_paths: Vec::new(),
            csrf_upload_paths: Vec::new(),
            csrf_cross_origin_paths: Vec::new(),
            cross_origin_origins: Vec::new(),
        }
    }
}

impl Settings {
    /// `.env`, then the JSON file named by `TOOLBOX_SETTINGS` (or `settings.json`
    /// when present), then environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut settings = match std::env::var(SETTINGS_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_SETTINGS_FILE).exists() => Self::from_file(DEFAULT_SETTINGS_FILE)?,
            Err(_) => Settings::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Settings(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Settings(format!("{}: {}", path.display(), e)))
    }

    /// Apply environment overrides through `lookup` so tests need not touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("DATABASE_URL") {
            self.pg_dsn = v;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.redis_url = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("PORT") {
            self.port = v
                .parse()
                .map_err(|_| ConfigError::Settings(format!("invalid PORT '{}'", v)))?;
        }
        if let Some(v) = lookup("TOOLBOX_SQL_PATH") {
            self.sql_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOOLBOX_PG_DB_EXISTS") {
            self.pg_db_exists = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    /// Database name: the DSN path without the leading slash.
    pub fn pg_name(&self) -> Result<String, ConfigError> {
        let url = url::Url::parse(&self.pg_dsn)
            .map_err(|e| ConfigError::Settings(format!("invalid pg_dsn: {}", e)))?;
        Ok(url.path().trim_start_matches('/').to_string())
    }

    /// DSN of the maintenance database on the same server, for creating or dropping ours.
    pub fn pg_server_dsn(&self) -> String {
        match self.pg_dsn.rsplit_once('/') {
            Some((server, _)) => format!("{}/postgres", server),
            None => self.pg_dsn.clone(),
        }
    }

    pub fn sql(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.sql_path)
            .map_err(|e| ConfigError::Settings(format!("{}: {}", self.sql_path.display(), e)))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_client_timeout)
    }

    pub fn csrf_config(&self) -> Result<CsrfConfig, ConfigError> {
        Ok(CsrfConfig {
            ignore_paths: compile_all(&self.csrf_ignore_paths, "$")?,
            upload_paths: compile_all(&self.csrf_upload_paths, "$")?,
            cross_origin_paths: compile_all(&self.csrf_cross_origin_paths, "$")?,
            cross_origin_origins: compile_all(&self.cross_origin_origins, "$")?,
            cross_origin_referers: compile_all(&self.cross_origin_origins, REFERER_END)?,
        })
    }
}

/// An allowed origin followed by a port, path, query, fragment or nothing.
const REFERER_END: &str = r"(?::\d+)?(?:[/?#]|$)";

fn compile_all(patterns: &[String], end: &str) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            let anchored = format!("^(?:{}){}", p, end);
            Regex::new(&anchored).map_err(|source| ConfigError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Compiled CSRF pattern sets. Path and origin patterns must match the whole
/// string; referers must start with a whole allowed origin.
#[derive(Clone, Debug, Default)]
pub struct CsrfConfig {
    pub ignore_paths: Vec<Regex>,
    pub upload_paths: Vec<Regex>,
    pub cross_origin_paths: Vec<Regex>,
    pub cross_origin_origins: Vec<Regex>,
    pub cross_origin_referers: Vec<Regex>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://u@db:5432/things"),
            ("PORT", "9001"),
            ("TOOLBOX_PG_DB_EXISTS", "true"),
            ("REDIS_URL", ""),
        ]
        .into_iter()
        .collect();
        let mut s = Settings::default();
        s.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.port, 9001);
        assert!(s.pg_db_exists);
        assert_eq!(s.redis_url, None);
        assert_eq!(s.pg_name().unwrap(), "things");
        assert_eq!(s.pg_server_dsn(), "postgres://u@db:5432/postgres");
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut s = Settings::default();
        let err = s.apply_env(|k| (k == "PORT").then(|| "http".to_string())).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: Settings = serde_json::from_str(r#"{"port": 1234, "csrf_ignore_paths": ["/hook/.*"]}"#).unwrap();
        assert_eq!(s.port, 1234);
        assert_eq!(s.max_request_size, 10 * 1024 * 1024);
        let csrf = s.csrf_config().unwrap();
        assert!(csrf.ignore_paths[0].is_match("/hook/x"));
        assert!(!csrf.ignore_paths[0].is_match("/api/hook/x"));
    }

    #[test]
    fn referer_patterns_need_a_whole_origin() {
        let s = Settings {
            cross_origin_origins: vec![r"https://partner\.example".into()],
            ..Settings::default()
        };
        let csrf = s.csrf_config().unwrap();
        let referer = &csrf.cross_origin_referers[0];
        for ok in ["https://partner.example", "https://partner.example/page", "https://partner.example:8443/x?y", "https://partner.example#top"] {
            assert!(referer.is_match(ok), "{}", ok);
        }
        for bad in ["https://partner.example.evil.com/x", "https://partner.examplex/", "https://partner.example@evil.com/"] {
            assert!(!referer.is_match(bad), "{}", bad);
        }
        assert!(!csrf.cross_origin_origins[0].is_match("https://partner.example/page"));
    }

    #[test]
    fn invalid_pattern_fails() {
        let s = Settings {
            csrf_upload_paths: vec!["[".into()],
            ..Settings::default()
        };
        assert!(matches!(s.csrf_config(), Err(ConfigError::InvalidPattern { .. })));
    }
}
