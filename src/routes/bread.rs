//! BREAD routes for one resource under a root path.
//!
//! `GET {root}/` browse, `GET {root}/{pk}/` retrieve, `POST {root}/add/` add,
//! `OPTIONS {root}/add/` add schema, `POST {root}/{pk}/` edit,
//! `OPTIONS {root}/{pk}/` edit schema, `POST {root}/{pk}/delete/` delete.
//! Only enabled actions are mounted.

use crate::config::{Action, Resource};
use crate::error::AppError;
use crate::extractors::RequestEnvelope;
use crate::handlers::dispatch;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::Method,
    response::IntoResponse,
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use std::sync::Arc;

fn action_route(action: Action, resource: &Arc<Resource>, filter: MethodFilter) -> MethodRouter<AppState> {
    let resource = resource.clone();
    on(
        filter,
        move |state: State<AppState>, envelope: RequestEnvelope, query: RawQuery, body: Bytes| {
            dispatch(action, resource.clone(), state, envelope, query, body)
        },
    )
}

/// Path and the actions served there, in mount order.
fn layout(root: &str) -> Vec<(String, Vec<(Action, Method)>)> {
    vec![
        (format!("{}/", root), vec![(Action::Browse, Method::GET)]),
        (
            format!("{}/add/", root),
            vec![(Action::Add, Method::POST), (Action::AddOptions, Method::OPTIONS)],
        ),
        (
            format!("{}/:pk/", root),
            vec![
                (Action::Retrieve, Method::GET),
                (Action::Edit, Method::POST),
                (Action::EditOptions, Method::OPTIONS),
            ],
        ),
        (format!("{}/:pk/delete/", root), vec![(Action::Delete, Method::POST)]),
    ]
}

fn method_filter(method: &Method) -> MethodFilter {
    match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        _ => MethodFilter::OPTIONS,
    }
}

/// Routes for `resource` mounted under `root` (trailing slashes are ignored).
/// A known path hit with the wrong verb answers a JSON 405 listing what is allowed.
pub fn bread_routes(root: &str, resource: Arc<Resource>) -> Router<AppState> {
    let root = root.trim_end_matches('/');
    let mut router = Router::new();
    for (path, actions) in layout(root) {
        let mut method_router: Option<MethodRouter<AppState>> = None;
        let mut allowed = Vec::new();
        for (action, method) in actions.into_iter().filter(|(a, _)| resource.enabled(*a)) {
            let route = action_route(action, &resource, method_filter(&method));
            method_router = Some(match method_router {
                Some(existing) => existing.merge(route),
                None => route,
            });
            allowed.push(method);
        }
        let Some(method_router) = method_router else {
            continue;
        };
        tracing::debug!(%path, ?allowed, "mounting bread route");
        let method_router = method_router.fallback(move || {
            let allowed = allowed.clone();
            async move {
                AppError::MethodNotAllowed {
                    message: "Method Not Allowed".into(),
                    allowed,
                }
                .into_response()
            }
        });
        router = router.route(&path, method_router);
    }
    router
}
