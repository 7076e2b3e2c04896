//! Runs against a real database when `TEST_DATABASE_URL` is set, otherwise skipped.

use apptoolbox::config::{resolve, Action, FieldSpec, FieldType, ResourceSpec};
use apptoolbox::{AppError, BreadService, PgDatabase, ResponseEnvelope};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;

const TABLE: &str = "toolbox_test_orgs";

async fn database() -> Option<PgDatabase> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", TABLE))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {} (id SERIAL PRIMARY KEY, name VARCHAR(255) NOT NULL, slug VARCHAR(10) UNIQUE, meta JSONB)",
        TABLE
    ))
    .execute(&pool)
    .await
    .unwrap();
    Some(PgDatabase::new(pool))
}

fn resource() -> apptoolbox::Resource {
    let mut spec = ResourceSpec::new(TABLE);
    spec.actions = vec![Action::Browse, Action::Retrieve, Action::Add, Action::Edit, Action::Delete];
    spec.name = Some("Organisation".into());
    spec.model.fields = vec![
        FieldSpec::new("name", FieldType::String),
        FieldSpec::new("slug", FieldType::String).max_length(10),
        FieldSpec::new("meta", FieldType::Json).nullable(),
    ];
    spec.browse_order_by = vec!["slug".into()];
    spec.page_size = 5;
    resolve(&spec).unwrap()
}

#[tokio::test]
async fn bread_round_trip() {
    let Some(db) = database().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let r = resource();

    let empty = BreadService::browse(&db, &r, 0).await.unwrap();
    assert_eq!(empty, ResponseEnvelope::page(vec![], 0, 0));

    let mut pks = Vec::new();
    for i in 0..7 {
        let body = json!({"name": format!("Org {}", i), "slug": format!("org-{}", i), "meta": {"n": i}});
        pks.push(BreadService::add(&db, &r, body.to_string().as_bytes()).await.unwrap());
    }

    let first = BreadService::browse(&db, &r, 0).await.unwrap();
    assert_eq!((first.count, first.pages), (Some(7), Some(2)));
    let items = first.items.unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(items[0]["slug"], "org-0");

    let second = BreadService::browse(&db, &r, 5).await.unwrap();
    assert_eq!((second.count, second.pages), (Some(7), Some(2)));
    let items = second.items.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["slug"], "org-6");

    let beyond = BreadService::browse(&db, &r, 10).await.unwrap();
    assert_eq!(beyond.items, Some(vec![]));
    assert_eq!(beyond.count, Some(7));

    let item = BreadService::retrieve(&db, &r, pks[2]).await.unwrap();
    assert_eq!(item["name"], "Org 2");
    assert_eq!(item["meta"], json!({"n": 2}));

    BreadService::edit(&db, &r, pks[2], br#"{"name": "Renamed"}"#).await.unwrap();
    let item = BreadService::retrieve(&db, &r, pks[2]).await.unwrap();
    assert_eq!(item["name"], "Renamed");
    assert_eq!(item["slug"], "org-2");

    let err = BreadService::add(&db, &r, br#"{"name": "Dup", "slug": "org-1"}"#).await.unwrap_err();
    match err {
        AppError::Conflict { details, .. } => assert_eq!(details[0].loc, vec!["slug"]),
        other => panic!("expected conflict, got {:?}", other),
    }

    let msg = BreadService::delete(&db, &r, pks[0]).await.unwrap();
    assert_eq!(msg, format!("Organisation {} deleted", pks[0]));
    let err = BreadService::delete(&db, &r, pks[0]).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let err = BreadService::retrieve(&db, &r, pks[0]).await.unwrap_err();
    assert_eq!(err.to_string(), "Organisation not found");
}
