//! Scripted in-memory database and app helpers for the integration tests.
#![allow(dead_code)]

use apptoolbox::config::{resolve, Action, FieldSpec, FieldType, ResourceSpec};
use apptoolbox::sql::{PgBindValue, QueryBuf};
use apptoolbox::{create_app, AppState, Database, DbError, Resource, Settings, SqlExecutor, Transaction};
use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What the next statement returns.
#[derive(Clone, Debug)]
pub enum Reply {
    Value(Option<Value>),
    Affected(u64),
    Unique(Vec<String>),
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub queries: Vec<(String, Vec<PgBindValue>)>,
    pub commits: usize,
    pub transactions: usize,
}

/// Replies are consumed in order, one per statement; running out is a test bug.
#[derive(Clone, Default)]
pub struct ScriptedDb {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    pub recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedDb {
    pub fn new(replies: Vec<Reply>) -> Self {
        ScriptedDb {
            replies: Arc::new(Mutex::new(replies.into())),
            recorded: Arc::default(),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.recorded.lock().unwrap().queries.iter().map(|(q, _)| q.clone()).collect()
    }

    pub fn params(&self, n: usize) -> Vec<PgBindValue> {
        self.recorded.lock().unwrap().queries[n].1.clone()
    }

    pub fn commits(&self) -> usize {
        self.recorded.lock().unwrap().commits
    }

    pub fn transactions(&self) -> usize {
        self.recorded.lock().unwrap().transactions
    }

    fn next(&self, q: &QueryBuf) -> Result<Reply, DbError> {
        self.recorded
            .lock()
            .unwrap()
            .queries
            .push((q.sql.clone(), q.params.clone()));
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Unique(columns)) => Err(DbError::UniqueViolation { columns }),
            Some(reply) => Ok(reply),
            None => panic!("unexpected query: {}", q.sql),
        }
    }
}

struct ScriptedExec {
    db: ScriptedDb,
}

#[async_trait]
impl SqlExecutor for ScriptedExec {
    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, DbError> {
        match self.db.next(q)? {
            Reply::Affected(n) => Ok(n),
            _ => Ok(1),
        }
    }

    async fn fetch_value(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError> {
        match self.db.next(q)? {
            Reply::Value(v) => Ok(v),
            other => panic!("scripted {:?} for fetch_value", other),
        }
    }

    async fn fetch_row(&mut self, q: &QueryBuf) -> Result<Option<Value>, DbError> {
        self.fetch_value(q).await
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, DbError> {
        match self.db.next(q)? {
            Reply::Value(Some(Value::Array(rows))) => Ok(rows),
            Reply::Value(_) => Ok(Vec::new()),
            other => panic!("scripted {:?} for fetch_all", other),
        }
    }
}

#[async_trait]
impl Transaction for ScriptedExec {
    async fn commit(&mut self) -> Result<(), DbError> {
        self.db.recorded.lock().unwrap().commits += 1;
        Ok(())
    }
}

#[async_trait]
impl Database for ScriptedDb {
    async fn executor(&self) -> Result<Box<dyn SqlExecutor>, DbError> {
        Ok(Box::new(ScriptedExec { db: self.clone() }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        self.recorded.lock().unwrap().transactions += 1;
        Ok(Box::new(ScriptedExec { db: self.clone() }))
    }
}

/// `organisations(name, slug)` with every action enabled, page size 5.
pub fn organisations() -> Resource {
    let mut spec = ResourceSpec::new("organisations");
    spec.actions = vec![Action::Browse, Action::Retrieve, Action::Add, Action::Edit, Action::Delete];
    spec.model.fields = vec![
        FieldSpec::new("name", FieldType::String),
        FieldSpec::new("slug", FieldType::String).max_length(10),
    ];
    spec.browse_order_by = vec!["slug".into()];
    spec.page_size = 5;
    resolve(&spec).unwrap()
}

pub fn app_with(db: ScriptedDb, settings: Settings, routes: Router<AppState>) -> Router {
    let state = AppState::new(settings, Arc::new(db)).unwrap();
    create_app(state, routes, false)
}

/// A JSON request that passes the CSRF checks through the localhost exception.
pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost:8000")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "localhost:8000")
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.last(), Some(&b'\n'), "json bodies end with a newline");
    serde_json::from_slice(&bytes).unwrap()
}
