//! App toolbox: bootstrap, BREAD resources, CSRF checks, error reporting and a
//! CLI for axum + PostgreSQL services.

pub mod app;
pub mod case;
pub mod cli;
pub mod config;
pub mod csrf;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod logs;
pub mod network;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod utils;

pub use app::{create_app, serve, startup};
pub use cli::{Cli, Commands, Toolbox};
pub use config::{load_from_path, resolve, resolve_model, Action, ModelSchema, Resource, ResourceSpec};
pub use csrf::{validate as csrf_validate, Verdict};
pub use db::{Database, Patch, PatchContext, PatchRegistry, PgDatabase, SqlExecutor, Transaction};
pub use error::{AppError, ConfigError, DbError};
pub use extractors::RequestEnvelope;
pub use handlers::{exec_route, ExecView};
pub use response::{FieldError, ResponseEnvelope};
pub use routes::bread_routes;
pub use service::{BreadService, RequestValidator};
pub use settings::{CsrfConfig, Settings};
pub use state::AppState;
