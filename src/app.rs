//! Application bootstrap: connections, middleware stack, serving.

use crate::csrf::{csrf_middleware, preflight_middleware};
use crate::db::{create_pool, prepare_database, redis_store, Database, PgDatabase};
use crate::logs::{error_middleware, panic_response};
use crate::settings::Settings;
use crate::state::AppState;
use axum::{middleware::from_fn_with_state, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Prepare the database (unless it is managed elsewhere), open the pool and
/// Redis when configured.
pub async fn startup(settings: Settings) -> anyhow::Result<AppState> {
    if !settings.pg_db_exists {
        prepare_database(&settings, false).await?;
    }
    let pool = create_pool(&settings).await?;
    let db: Arc<dyn Database> = Arc::new(PgDatabase::new(pool));
    let redis = match &settings.redis_url {
        Some(url) => Some(redis_store::connect(url).await?),
        None => None,
    };
    let mut state = AppState::new(settings, db)?;
    if let Some(redis) = redis {
        state = state.with_redis(redis);
    }
    Ok(state)
}

/// Mount `routes` behind the standard middleware, outermost first:
/// panic catcher, error reporting, body limit, preflight, then CSRF on matched routes.
pub fn create_app(state: AppState, routes: Router<AppState>, access_log: bool) -> Router {
    let app = routes
        .route_layer(from_fn_with_state(state.csrf.clone(), csrf_middleware))
        .layer(from_fn_with_state(state.csrf.clone(), preflight_middleware))
        .layer(RequestBodyLimitLayer::new(state.settings.max_request_size))
        .layer(from_fn_with_state(state.clone(), error_middleware))
        .layer(CatchPanicLayer::custom(panic_response));
    let app = if access_log {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    };
    app.with_state(state)
}

/// Serve until ctrl-c, then close the database.
pub async fn serve(state: AppState, routes: Router<AppState>, access_log: bool) -> anyhow::Result<()> {
    let port = state.settings.port;
    let db = state.db.clone();
    let app = create_app(state, routes, access_log);
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    db.close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
