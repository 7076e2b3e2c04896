//! BREAD action handlers. Each enabled action maps to one plain function over a
//! shared [`BreadContext`]; the route table picks the function by [`Action`].

use crate::config::{Action, Resource};
use crate::error::AppError;
use crate::extractors::RequestEnvelope;
use crate::response::{json_response, ResponseEnvelope};
use crate::service::BreadService;
use crate::state::AppState;
use crate::utils::{get_offset, page_param};
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Everything an action needs from the request.
pub struct BreadContext {
    pub state: AppState,
    pub resource: Arc<Resource>,
    pub envelope: RequestEnvelope,
    pub page: Option<String>,
    pub body: Bytes,
}

pub type ActionResult = Result<Response, AppError>;
pub type ActionHandler = fn(BreadContext) -> BoxFuture<'static, ActionResult>;

/// The dispatch table.
pub fn action_handler(action: Action) -> ActionHandler {
    match action {
        Action::Browse => browse,
        Action::Retrieve => retrieve,
        Action::Add => add,
        Action::Edit => edit,
        Action::Delete => delete,
        Action::AddOptions | Action::EditOptions => options,
    }
}

fn browse(ctx: BreadContext) -> BoxFuture<'static, ActionResult> {
    Box::pin(async move {
        let offset = get_offset(ctx.page.as_deref(), ctx.resource.page_size)?;
        let page = BreadService::browse(ctx.state.db.as_ref(), &ctx.resource, offset).await?;
        Ok(json_response(StatusCode::OK, &page))
    })
}

fn retrieve(ctx: BreadContext) -> BoxFuture<'static, ActionResult> {
    Box::pin(async move {
        let pk = ctx.envelope.parse_pk()?;
        let item = BreadService::retrieve(ctx.state.db.as_ref(), &ctx.resource, pk).await?;
        Ok(json_response(StatusCode::OK, &item))
    })
}

fn add(ctx: BreadContext) -> BoxFuture<'static, ActionResult> {
    Box::pin(async move {
        let pk = BreadService::add(ctx.state.db.as_ref(), &ctx.resource, &ctx.body).await?;
        Ok(json_response(StatusCode::CREATED, &ResponseEnvelope::created(pk)))
    })
}

fn edit(ctx: BreadContext) -> BoxFuture<'static, ActionResult> {
    Box::pin(async move {
        let pk = ctx.envelope.parse_pk()?;
        BreadService::edit(ctx.state.db.as_ref(), &ctx.resource, pk, &ctx.body).await?;
        Ok(json_response(StatusCode::OK, &ResponseEnvelope::ok()))
    })
}

fn delete(ctx: BreadContext) -> BoxFuture<'static, ActionResult> {
    Box::pin(async move {
        let pk = ctx.envelope.parse_pk()?;
        let message = BreadService::delete(ctx.state.db.as_ref(), &ctx.resource, pk).await?;
        Ok(json_response(StatusCode::OK, &ResponseEnvelope::deleted(message, pk)))
    })
}

fn options(ctx: BreadContext) -> BoxFuture<'static, ActionResult> {
    Box::pin(async move { Ok(json_response(StatusCode::OK, &ctx.resource.model.json_schema())) })
}

/// Axum entry point shared by every BREAD route.
pub async fn dispatch(
    action: Action,
    resource: Arc<Resource>,
    State(state): State<AppState>,
    envelope: RequestEnvelope,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    tracing::debug!(table = %resource.table, action = action.as_str(), path = %envelope.path, "bread request");
    let ctx = BreadContext {
        state,
        resource,
        envelope,
        page: page_param(query.as_deref()),
        body,
    };
    match action_handler(action)(ctx).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}
