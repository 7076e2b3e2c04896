//! Resolve resource specs into runtime resources; load specs from JSON files.

use crate::case::singular_title;
use crate::config::resolved::field_title;
use crate::config::{validate, Actions, Field, ModelSchema, ModelSpec, Resource, ResourceSpec};
use crate::error::ConfigError;
use crate::sql::OrderField;
use regex::Regex;
use std::path::Path;

/// Resolve a model spec on its own, as exec views need. `default_title` is
/// used when the model spec carries none.
pub fn resolve_model(spec: &ModelSpec, default_title: &str) -> Result<ModelSchema, ConfigError> {
    let mut fields: Vec<Field> = Vec::with_capacity(spec.fields.len());
    for f in &spec.fields {
        if fields.iter().any(|existing| existing.name == f.name) {
            return Err(ConfigError::InvalidResource {
                resource: default_title.to_string(),
                message: format!("duplicate field '{}'", f.name),
            });
        }
        // Anchored so the whole value has to match.
        let pattern = match &f.rule.pattern {
            Some(p) => Some(Regex::new(&format!("^(?:{})$", p)).map_err(|source| {
                ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                }
            })?),
            None => None,
        };
        let required = f
            .rule
            .required
            .unwrap_or(f.default.is_none() && !f.nullable);
        fields.push(Field {
            name: f.name.clone(),
            title: field_title(&f.name),
            field_type: f.type_,
            required,
            nullable: f.nullable,
            default: f.default.clone(),
            rule: f.rule.clone(),
            pattern,
        });
    }
    let title = spec.title.clone().unwrap_or_else(|| default_title.to_string());
    Ok(ModelSchema::new(title, fields))
}

/// Build a resolved resource from its spec (validates first).
pub fn resolve(spec: &ResourceSpec) -> Result<Resource, ConfigError> {
    validate(spec)?;

    let single_title = spec.name.clone().unwrap_or_else(|| singular_title(&spec.table));
    let model = resolve_model(&spec.model, &single_title)?;

    let qualify = |name: &str| -> String {
        match &spec.table_as {
            Some(alias) if !name.contains('.') => format!("{}.{}", alias, name),
            _ => name.to_string(),
        }
    };
    // Default selection: primary key followed by every model field.
    let default_fields: Vec<String> = std::iter::once(spec.pk_field.as_str())
        .chain(model.names())
        .map(qualify)
        .collect();
    let browse_fields = spec
        .browse_fields
        .clone()
        .unwrap_or_else(|| default_fields.clone());
    let retrieve_fields = spec.retrieve_fields.clone().unwrap_or(default_fields);

    let actions: Actions = spec.actions.iter().copied().collect();
    tracing::debug!(table = %spec.table, ?actions, "resolved resource");

    Ok(Resource {
        table: spec.table.clone(),
        table_as: spec.table_as.clone(),
        single_title,
        pk_field: spec.pk_field.clone(),
        actions,
        model,
        browse_fields,
        retrieve_fields,
        order_by: spec.browse_order_by.iter().map(|s| OrderField::parse(s)).collect(),
        page_size: spec.page_size,
        filters: spec
            .filters
            .iter()
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect(),
        join: spec.join.clone(),
        prepare_add_data: None,
        prepare_edit_data: None,
    })
}

/// Read a JSON array of resource specs.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Vec<ResourceSpec>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}
