//! Demo application: one BREAD resource, one exec view, two patches.
//!
//! `cargo run --example organisations -- --root demos web`

use apptoolbox::case::slugify;
use apptoolbox::config::{resolve, resolve_model, Action, FieldSpec, FieldType, ModelSpec, ResourceSpec};
use apptoolbox::db::run_sql_section;
use apptoolbox::sql::{PgBindValue, QueryBuf};
use apptoolbox::{bread_routes, exec_route, AppError, AppState, Cli, ExecView, Patch, PatchContext, PatchRegistry, Settings, Toolbox};
use axum::{routing::get, Router};
use clap::Parser;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use sqlx::PgConnection;
use std::sync::Arc;

const SLUG_MAX: usize = 10;

fn organisations() -> Result<apptoolbox::Resource, apptoolbox::ConfigError> {
    let mut spec = ResourceSpec::new("organisations");
    spec.actions = vec![Action::Browse, Action::Retrieve, Action::Add, Action::Edit, Action::Delete];
    spec.model.fields = vec![
        FieldSpec::new("name", FieldType::String).max_length(255),
        FieldSpec::new("slug", FieldType::String).max_length(SLUG_MAX as u32).nullable(),
        FieldSpec::new("meta", FieldType::Json).nullable(),
    ];
    spec.browse_order_by = vec!["slug".into()];
    spec.page_size = 5;
    Ok(resolve(&spec)?.with_add_hook(fill_slug))
}

/// Derive a slug from the name when none was sent.
fn fill_slug(mut data: Map<String, Value>) -> Result<Map<String, Value>, AppError> {
    if data.get("slug").map_or(true, Value::is_null) {
        let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
        let slug: String = slugify(name).chars().take(SLUG_MAX).collect();
        if slug.is_empty() {
            return Err(AppError::bad_request("unable to derive a slug from the name"));
        }
        data.insert("slug".into(), json!(slug));
    }
    Ok(data)
}

fn power_view() -> Result<ExecView, apptoolbox::ConfigError> {
    let model = resolve_model(
        &ModelSpec {
            title: Some("Power".into()),
            fields: vec![FieldSpec::new("pow", FieldType::Integer)],
        },
        "Power",
    )?;
    Ok(ExecView::new(model, |state: AppState, data: Map<String, Value>| async move {
        let mut q = QueryBuf::new();
        let pow = data.get("pow").and_then(Value::as_i64).unwrap_or_default();
        let p = q.push_param(PgBindValue::I64(pow), Some("float8"));
        q.sql = format!("SELECT 2 ^ {}", p);
        let mut exec = state.db.executor().await?;
        let ans = exec.fetch_value(&q).await?;
        Ok(Some(json!({ "ans": ans })))
    }))
}

fn rerun_slug_trigger<'a>(
    conn: &'a mut PgConnection,
    ctx: &'a PatchContext<'a>,
) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
    Box::pin(async move {
        let sql = ctx.settings.sql()?;
        run_sql_section("slug_trigger", &sql, conn).await?;
        Ok(Some("slug trigger recreated".into()))
    })
}

fn count_orgs<'a>(conn: &'a mut PgConnection, _ctx: &'a PatchContext<'a>) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
    Box::pin(async move {
        let n: i64 = sqlx::query_scalar("SELECT count(*) FROM organisations").fetch_one(conn).await?;
        Ok(Some(format!("{} organisations", n)))
    })
}

async fn worker(settings: Settings) -> anyhow::Result<()> {
    tracing::info!(redis = ?settings.redis_url, "demo worker idle, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let orgs = Arc::new(organisations()?);
    let power = Arc::new(power_view()?);
    let routes = move |_: &Settings| -> Router<AppState> {
        Router::new()
            .route("/", get(|| async { "testing" }))
            .route("/exec/", exec_route(power.clone()))
            .merge(bread_routes("/orgs/", orgs.clone()))
    };

    let mut patches = PatchRegistry::default();
    patches
        .register(Patch::new("rerun_slug_trigger", "recreate the slug trigger from models.sql", rerun_slug_trigger))
        .register(Patch::new("count_orgs", "count organisations, changes nothing", count_orgs).direct());

    let toolbox = Toolbox::new(routes).worker(worker).patches(patches);
    std::process::exit(toolbox.run(Cli::parse()).await);
}
