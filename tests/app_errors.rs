mod common;

use apptoolbox::config::{resolve_model, FieldSpec, FieldType, ModelSpec};
use apptoolbox::logs::default_should_warn;
use apptoolbox::{create_app, exec_route, AppError, AppState, DbError, ExecView, Settings};
use axum::http::{header, StatusCode};
use axum::{routing::get, Router};
use common::{app_with, body_json, get as get_request, json_request, ScriptedDb};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

fn power_view() -> ExecView {
    let model = resolve_model(
        &ModelSpec {
            title: Some("Power".into()),
            fields: vec![FieldSpec::new("pow", FieldType::Integer)],
        },
        "Power",
    )
    .unwrap();
    ExecView::new(model, |_state: AppState, data: Map<String, Value>| async move {
        match data.get("pow").and_then(Value::as_i64) {
            Some(0) => Ok(None),
            Some(n) => Ok(Some(json!({ "ans": 2i64.pow(n as u32) }))),
            None => Err(AppError::bad_request("pow missing")),
        }
    })
}

fn exec_app() -> Router {
    let routes = Router::new().route("/exec/", exec_route(Arc::new(power_view())));
    app_with(ScriptedDb::new(vec![]), Settings::default(), routes)
}

#[tokio::test]
async fn exec_view_get_and_options_return_schema() {
    let response = exec_app().oneshot(get_request("/exec/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let schema = body_json(response).await;
    assert_eq!(schema["title"], "Power");
    assert_eq!(schema["properties"]["pow"]["type"], "integer");

    let response = exec_app()
        .oneshot(json_request("OPTIONS", "/exec/", ""))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, schema);
}

#[tokio::test]
async fn exec_view_post_runs_the_function() {
    let response = exec_app()
        .oneshot(json_request("POST", "/exec/", r#"{"pow": 3}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ans": 8}));

    let response = exec_app()
        .oneshot(json_request("POST", "/exec/", r#"{"pow": 0}"#))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"status": "ok"}));

    let response = exec_app()
        .oneshot(json_request("POST", "/exec/", r#"{"pow": "x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid Data");
    assert_eq!(body["details"][0]["loc"], json!(["pow"]));
}

#[tokio::test]
async fn exec_view_rejects_other_methods() {
    let response = exec_app()
        .oneshot(json_request("PUT", "/exec/", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET,OPTIONS,POST");
    assert_eq!(
        body_json(response).await["message"],
        "Only GET, OPTIONS and POST requests are permitted."
    );
}

fn failing_app() -> Router {
    let routes: Router<AppState> = Router::new()
        .route(
            "/internal/",
            get(|| async { Err::<(), _>(AppError::Internal(anyhow::anyhow!("secret detail"))) }),
        )
        .route(
            "/db/",
            get(|| async { Err::<(), _>(AppError::Db(DbError::Decode("bad row".into()))) }),
        )
        .route(
            "/panic/",
            get(|| async {
                if true {
                    panic!("handler blew up");
                }
                "unreachable"
            }),
        )
        .route("/teapot/", get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }));
    app_with(ScriptedDb::new(vec![]), Settings::default(), routes)
}

#[tokio::test]
async fn internal_errors_become_a_bare_500() {
    for uri in ["/internal/", "/db/"] {
        let response = failing_app().oneshot(get_request(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, json!({"message": "Internal Server Error"}));
    }
}

#[tokio::test]
async fn panics_become_a_json_500() {
    let response = failing_app().oneshot(get_request("/panic/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await, json!({"message": "Internal Server Error"}));
}

#[tokio::test]
async fn warned_responses_keep_their_body() {
    let response = failing_app().oneshot(get_request("/teapot/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"short and stout");
}

static WARNED: Mutex<Vec<u16>> = Mutex::new(Vec::new());

fn record_warning(status: StatusCode) -> bool {
    WARNED.lock().unwrap().push(status.as_u16());
    default_should_warn(status)
}

#[tokio::test]
async fn oversized_bodies_are_refused_and_warned() {
    let settings = Settings {
        max_request_size: 16,
        ..Settings::default()
    };
    let routes = Router::new().route("/exec/", exec_route(Arc::new(power_view())));
    let state = AppState::new(settings, Arc::new(ScriptedDb::new(vec![])))
        .unwrap()
        .with_should_warn(record_warning);
    let app = create_app(state, routes, false);
    let response = app
        .oneshot(json_request("POST", "/exec/", r#"{"pow": 3, "padding": "xxxxxxxxxxxxxxxx"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await, json!({"message": "Request Entity Too Large"}));
    assert_eq!(*WARNED.lock().unwrap(), vec![413]);
}
