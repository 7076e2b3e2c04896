//! BREAD execution: clause pipelines per action, run through the SQL capability.

use crate::config::{FieldType, Resource};
use crate::db::{Database, SqlExecutor};
use crate::error::{AppError, DbError};
use crate::response::{FieldError, ResponseEnvelope};
use crate::service::validation::RequestValidator;
use crate::sql::{
    delete, insert, update, Clause, Clauses, ColumnValue, PgBindValue, QueryBuf, SelectItem,
};
use serde_json::{Map, Value};

pub struct BreadService;

impl BreadService {
    fn select(fields: &[String]) -> Clause {
        Clause::Select(fields.iter().map(|f| SelectItem::Column(f.clone())).collect())
    }

    fn from_(resource: &Resource) -> Clause {
        Clause::From {
            table: resource.table.clone(),
            alias: resource.table_as.clone(),
        }
    }

    fn join(resource: &Resource) -> Option<Clause> {
        resource.join.clone().map(Clause::Join)
    }

    /// Configured filters, plus the primary key when one is given.
    fn where_(resource: &Resource, pk: Option<i64>) -> Option<Clause> {
        let mut conds: Vec<ColumnValue> = resource
            .filters
            .iter()
            .map(|(field, value)| ColumnValue::new(field.clone(), PgBindValue::from_json(value)))
            .collect();
        if let Some(pk) = pk {
            conds.push(ColumnValue::new(resource.pk_ref(), PgBindValue::I64(pk)));
        }
        (!conds.is_empty()).then_some(Clause::Where(conds))
    }

    /// Reject non-positive keys before any SQL runs.
    pub fn check_pk(pk: i64) -> Result<i64, AppError> {
        if pk < 1 {
            Err(AppError::bad_request("request pk must be greater than 0"))
        } else {
            Ok(pk)
        }
    }

    pub fn browse_items_query(resource: &Resource, offset: u64) -> Clauses {
        Clauses::new()
            .push(Self::select(&resource.browse_fields))
            .push(Self::from_(resource))
            .push(Self::join(resource))
            .push(Self::where_(resource, None))
            .push(Clause::OrderBy(resource.order_by.clone()))
            .push(Clause::Limit(u64::from(resource.page_size)))
            .push(Clause::Offset(offset))
    }

    pub fn browse_count_query(resource: &Resource) -> Clauses {
        Clauses::new()
            .push(Clause::Select(vec![SelectItem::Expr {
                sql: "count(*)".into(),
                alias: "count_".into(),
            }]))
            .push(Self::from_(resource))
            .push(Self::join(resource))
            .push(Self::where_(resource, None))
    }

    /// One statement producing `{"items": [...], "count": n, "pages": n}`.
    pub fn browse_query(resource: &Resource, offset: u64) -> QueryBuf {
        let mut q = QueryBuf::new();
        let items = Self::browse_items_query(resource, offset).render_into(&mut q);
        let count = Self::browse_count_query(resource).render_into(&mut q);
        q.sql = format!(
            "SELECT json_build_object(\n  'items', i.items,\n  'count', c.count_,\n  'pages', ceil(c.count_ / {size}::float)::int\n)\n\
             FROM (\n  SELECT coalesce(array_to_json(array_agg(row_to_json(t))), '[]') AS items FROM (\n{items}\n  ) AS t\n) AS i,\n\
             (\n{count}\n) AS c",
            size = resource.page_size,
            items = items,
            count = count,
        );
        q
    }

    pub fn retrieve_query(resource: &Resource, pk: i64) -> QueryBuf {
        let mut q = QueryBuf::new();
        let inner = Clauses::new()
            .push(Self::select(&resource.retrieve_fields))
            .push(Self::from_(resource))
            .push(Self::join(resource))
            .push(Self::where_(resource, Some(pk)))
            .push(Clause::Limit(1))
            .render_into(&mut q);
        q.sql = format!("SELECT row_to_json(t) FROM (\n{}\n) AS t", inner);
        q
    }

    /// Existence and permission probe: the row must be reachable through the
    /// same FROM/JOIN/WHERE as retrieve.
    pub fn check_item_query(resource: &Resource, pk: i64) -> QueryBuf {
        Clauses::new()
            .push(Clause::Select(vec![SelectItem::Column(resource.pk_ref())]))
            .push(Self::from_(resource))
            .push(Self::join(resource))
            .push(Self::where_(resource, Some(pk)))
            .push(Clause::Limit(1))
            .to_query()
    }

    /// Column values with casts from the model; keys the model does not
    /// declare (added by a prepare hook) are bound as-is.
    fn column_values(resource: &Resource, data: &Map<String, Value>) -> Vec<ColumnValue> {
        data.iter()
            .map(|(name, value)| match resource.model.field(name) {
                Some(field) => {
                    let bound = match (field.field_type, value) {
                        (_, Value::Null) => PgBindValue::Null,
                        (FieldType::Json, v) => PgBindValue::Json(v.clone()),
                        (_, v) => PgBindValue::from_json(v),
                    };
                    ColumnValue::new(name.clone(), bound).with_cast(Some(field.field_type.pg_cast()))
                }
                None => ColumnValue::new(name.clone(), PgBindValue::from_json(value)),
            })
            .collect()
    }

    pub fn add_query(resource: &Resource, data: &Map<String, Value>) -> QueryBuf {
        insert(&resource.table, &Self::column_values(resource, data), &resource.pk_field)
    }

    pub fn edit_query(resource: &Resource, pk: i64, data: &Map<String, Value>) -> QueryBuf {
        let filter = ColumnValue::new(resource.pk_field.clone(), PgBindValue::I64(pk));
        update(&resource.table, &Self::column_values(resource, data), &filter)
    }

    pub fn delete_query(resource: &Resource, pk: i64) -> QueryBuf {
        let filter = ColumnValue::new(resource.pk_field.clone(), PgBindValue::I64(pk));
        delete(&resource.table, &filter)
    }

    fn not_found(resource: &Resource) -> AppError {
        AppError::NotFound(format!("{} not found", resource.single_title))
    }

    /// 409 listing the violated columns the model declares; storage-only
    /// columns are left out.
    pub fn conflict_report(resource: &Resource, columns: &[String]) -> AppError {
        let details = columns
            .iter()
            .filter(|col| resource.model.contains(col))
            .map(|col| {
                FieldError::new(
                    col,
                    format!("This value conflicts with an existing \"{}\", try something else.", col),
                    "value_error.conflict",
                )
            })
            .collect();
        AppError::Conflict {
            message: "Conflict".into(),
            details,
        }
    }

    fn map_write_error(resource: &Resource, e: DbError) -> AppError {
        match e {
            DbError::UniqueViolation { columns } => Self::conflict_report(resource, &columns),
            other => AppError::Db(other),
        }
    }

    async fn check_item<E: SqlExecutor + ?Sized>(exec: &mut E, resource: &Resource, pk: i64) -> Result<(), AppError> {
        match exec.fetch_value(&Self::check_item_query(resource, pk)).await? {
            Some(v) if !v.is_null() => Ok(()),
            _ => Err(Self::not_found(resource)),
        }
    }

    /// Page of items. `offset` comes from [`crate::utils::get_offset`].
    pub async fn browse(db: &dyn Database, resource: &Resource, offset: u64) -> Result<ResponseEnvelope, AppError> {
        let mut exec = db.executor().await?;
        let page = exec.fetch_value(&Self::browse_query(resource, offset)).await?;
        page.as_ref()
            .and_then(decode_page)
            .ok_or_else(|| AppError::Db(DbError::Decode(format!("browse query returned {:?}", page))))
    }

    pub async fn retrieve(db: &dyn Database, resource: &Resource, pk: i64) -> Result<Value, AppError> {
        let pk = Self::check_pk(pk)?;
        let mut exec = db.executor().await?;
        match exec.fetch_value(&Self::retrieve_query(resource, pk)).await? {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(Self::not_found(resource)),
        }
    }

    /// Validate, transform and insert. Returns the new primary key.
    pub async fn add(db: &dyn Database, resource: &Resource, body: &[u8]) -> Result<i64, AppError> {
        let raw = parse_json(body)?;
        let data = RequestValidator::validate(&resource.model, &raw).map_err(AppError::invalid_data)?;
        let data = match &resource.prepare_add_data {
            Some(hook) => hook(data)?,
            None => data,
        };
        let mut exec = db.executor().await?;
        let pk = exec
            .fetch_value(&Self::add_query(resource, &data))
            .await
            .map_err(|e| Self::map_write_error(resource, e))?;
        pk.as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::Db(DbError::Decode(format!("insert returned {:?}", pk))))
    }

    /// Probe, then apply the fields present in the body. Both statements run
    /// in one transaction.
    pub async fn edit(db: &dyn Database, resource: &Resource, pk: i64, body: &[u8]) -> Result<(), AppError> {
        let pk = Self::check_pk(pk)?;
        let mut tx = db.begin().await?;
        Self::check_item(&mut *tx, resource, pk).await?;

        let raw = parse_json(body)?;
        let raw = match raw {
            Value::Object(map) => map,
            _ => return Err(AppError::bad_request("data not a dictionary")),
        };
        let data = RequestValidator::validate_partial(&resource.model, &raw).map_err(AppError::invalid_data)?;
        let data = match &resource.prepare_edit_data {
            Some(hook) => hook(pk, data)?,
            None => data,
        };
        if data.is_empty() {
            return Err(AppError::bad_request("no data to save"));
        }

        tx.execute(&Self::edit_query(resource, pk, &data))
            .await
            .map_err(|e| Self::map_write_error(resource, e))?;
        tx.commit().await?;
        Ok(())
    }

    /// Probe, then delete, in one transaction. Returns the success message.
    pub async fn delete(db: &dyn Database, resource: &Resource, pk: i64) -> Result<String, AppError> {
        let pk = Self::check_pk(pk)?;
        let mut tx = db.begin().await?;
        Self::check_item(&mut *tx, resource, pk).await?;
        tx.execute(&Self::delete_query(resource, pk)).await?;
        tx.commit().await?;
        Ok(format!("{} {} deleted", resource.single_title, pk))
    }
}

fn decode_page(page: &Value) -> Option<ResponseEnvelope> {
    let items = page.get("items")?.as_array()?.clone();
    let count = page.get("count")?.as_i64()?;
    let pages = page.get("pages")?.as_i64()?;
    Some(ResponseEnvelope::page(items, count, pages))
}

/// Request body as JSON; anything unparsable is "Invalid JSON".
pub fn parse_json(body: &[u8]) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "invalid request json");
        AppError::bad_request("Invalid JSON")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, Action, FieldSpec, FilterSpec, ResourceSpec};
    use serde_json::json;

    fn resource() -> Resource {
        let mut spec = ResourceSpec::new("organisations");
        spec.actions = vec![Action::Browse, Action::Retrieve, Action::Add, Action::Edit, Action::Delete];
        spec.model.fields = vec![
            FieldSpec::new("name", FieldType::String),
            FieldSpec::new("slug", FieldType::String).nullable(),
            FieldSpec::new("meta", FieldType::Json).nullable(),
        ];
        spec.browse_order_by = vec!["slug".into()];
        spec.page_size = 5;
        resolve(&spec).unwrap()
    }

    #[test]
    fn browse_query_shares_parameters() {
        let mut spec = ResourceSpec::new("organisations");
        spec.table_as = Some("o".into());
        spec.model.fields = vec![FieldSpec::new("name", FieldType::String)];
        spec.filters = vec![FilterSpec {
            field: "o.active".into(),
            value: json!(true),
        }];
        spec.page_size = 5;
        let r = resolve(&spec).unwrap();

        let q = BreadService::browse_query(&r, 10);
        assert!(q.sql.contains(
            "SELECT \"o\".\"id\", \"o\".\"name\"\nFROM \"organisations\" AS \"o\"\nWHERE \"o\".\"active\" = $1\nLIMIT 5\nOFFSET 10"
        ));
        assert!(q.sql.contains("SELECT count(*) AS \"count_\"\nFROM \"organisations\" AS \"o\"\nWHERE \"o\".\"active\" = $2"));
        assert!(q.sql.contains("ceil(c.count_ / 5::float)::int"));
        assert_eq!(q.params, vec![PgBindValue::Bool(true), PgBindValue::Bool(true)]);
    }

    #[test]
    fn first_page_has_no_offset() {
        let q = BreadService::browse_query(&resource(), 0);
        assert!(q.sql.contains("ORDER BY \"slug\"\nLIMIT 5\n  ) AS t"));
        assert!(!q.sql.contains("OFFSET"));
        assert!(!q.sql.contains("WHERE"));
    }

    #[test]
    fn retrieve_and_probe_filter_by_pk() {
        let r = resource();
        let q = BreadService::retrieve_query(&r, 3);
        assert_eq!(
            q.sql,
            "SELECT row_to_json(t) FROM (\nSELECT \"id\", \"name\", \"slug\", \"meta\"\nFROM \"organisations\"\nWHERE \"id\" = $1\nLIMIT 1\n) AS t"
        );
        assert_eq!(q.params, vec![PgBindValue::I64(3)]);

        let q = BreadService::check_item_query(&r, 3);
        assert_eq!(q.sql, "SELECT \"id\"\nFROM \"organisations\"\nWHERE \"id\" = $1\nLIMIT 1");
    }

    #[test]
    fn writes_cast_by_field_type() {
        let r = resource();
        let data = json!({"name": "Org", "meta": "just text", "slug": null});
        let q = BreadService::add_query(&r, data.as_object().unwrap());
        assert_eq!(
            q.sql,
            "INSERT INTO \"organisations\" (\"meta\", \"name\", \"slug\") VALUES ($1::jsonb, $2::text, $3::text) RETURNING \"id\""
        );
        assert_eq!(q.params[0], PgBindValue::Json(json!("just text")));
        assert_eq!(q.params[2], PgBindValue::Null);

        let data = json!({"name": "X"});
        let q = BreadService::edit_query(&r, 9, data.as_object().unwrap());
        assert_eq!(q.sql, "UPDATE \"organisations\" SET \"name\" = $1::text WHERE \"id\" = $2");
        let q = BreadService::delete_query(&r, 9);
        assert_eq!(q.sql, "DELETE FROM \"organisations\" WHERE \"id\" = $1");
    }

    #[test]
    fn conflict_report_keeps_model_columns_only() {
        let err = BreadService::conflict_report(&resource(), &["org_id".into(), "slug".into()]);
        match err {
            AppError::Conflict { message, details } => {
                assert_eq!(message, "Conflict");
                assert_eq!(details.len(), 1);
                assert_eq!(details[0].loc, vec!["slug"]);
                assert_eq!(
                    details[0].msg,
                    "This value conflicts with an existing \"slug\", try something else."
                );
                assert_eq!(details[0].kind, "value_error.conflict");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn page_objects_decode_into_the_envelope() {
        let page = decode_page(&json!({"items": [{"id": 1}], "count": 1, "pages": 1})).unwrap();
        assert_eq!(page, ResponseEnvelope::page(vec![json!({"id": 1})], 1, 1));
        assert!(decode_page(&json!({"items": null, "count": 0, "pages": 0})).is_none());
        assert!(decode_page(&json!("page")).is_none());
    }

    #[test]
    fn pk_must_be_positive() {
        assert!(BreadService::check_pk(1).is_ok());
        let err = BreadService::check_pk(0).unwrap_err();
        assert_eq!(err.to_string(), "request pk must be greater than 0");
    }
}
