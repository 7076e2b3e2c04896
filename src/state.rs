//! Shared application state for all routes. Built once at startup, cloned per request.

use crate::db::Database;
use crate::error::ConfigError;
use crate::logs::default_should_warn;
use crate::settings::{CsrfConfig, Settings};
use axum::http::StatusCode;
use redis::aio::ConnectionManager;
use std::sync::Arc;

/// Decides which response statuses the error middleware logs as warnings.
pub type ShouldWarn = fn(StatusCode) -> bool;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Compiled from `settings` once.
    pub csrf: Arc<CsrfConfig>,
    pub db: Arc<dyn Database>,
    pub redis: Option<ConnectionManager>,
    pub should_warn: ShouldWarn,
}

impl AppState {
    pub fn new(settings: Settings, db: Arc<dyn Database>) -> Result<Self, ConfigError> {
        let csrf = settings.csrf_config()?;
        Ok(AppState {
            settings: Arc::new(settings),
            csrf: Arc::new(csrf),
            db,
            redis: None,
            should_warn: default_should_warn,
        })
    }

    pub fn with_redis(mut self, redis: ConnectionManager) -> Self {
        self.redis = Some(redis);
        self
    }

    pub fn with_should_warn(mut self, should_warn: ShouldWarn) -> Self {
        self.should_warn = should_warn;
        self
    }
}
