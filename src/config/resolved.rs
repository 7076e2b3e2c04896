//! Resolved resource model: config validated and flattened for runtime use.

use crate::case::to_title_case;
use crate::config::{Action, FieldType, ValidationRule};
use crate::error::AppError;
use crate::sql::OrderField;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Capability bitset over the five BREAD actions. The `*_options` actions
/// follow `add` and `edit`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Actions(u8);

impl Actions {
    pub const BROWSE: Actions = Actions(1);
    pub const RETRIEVE: Actions = Actions(1 << 1);
    pub const ADD: Actions = Actions(1 << 2);
    pub const EDIT: Actions = Actions(1 << 3);
    pub const DELETE: Actions = Actions(1 << 4);
    pub const ALL: Actions = Actions(0b1_1111);

    pub fn empty() -> Self {
        Actions(0)
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= Self::bit(action).0;
    }

    pub fn contains(&self, action: Action) -> bool {
        let bit = Self::bit(action).0;
        self.0 & bit == bit
    }

    fn bit(action: Action) -> Actions {
        match action {
            Action::Browse => Self::BROWSE,
            Action::Retrieve => Self::RETRIEVE,
            Action::Add | Action::AddOptions => Self::ADD,
            Action::Edit | Action::EditOptions => Self::EDIT,
            Action::Delete => Self::DELETE,
        }
    }
}

impl FromIterator<Action> for Actions {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut out = Actions::empty();
        for a in iter {
            out.insert(a);
        }
        out
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [Action::Browse, Action::Retrieve, Action::Add, Action::Edit, Action::Delete]
            .into_iter()
            .filter(|a| self.contains(*a))
            .map(|a| a.as_str())
            .collect();
        f.debug_tuple("Actions").field(&names).finish()
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub title: String,
    pub field_type: FieldType,
    pub required: bool,
    pub nullable: bool,
    pub default: Option<Value>,
    pub rule: ValidationRule,
    /// Compiled once at startup from `rule.pattern`.
    pub pattern: Option<Regex>,
}

/// Input schema of a resource: ordered fields with their rules.
#[derive(Clone, Debug)]
pub struct ModelSchema {
    pub title: String,
    pub fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl ModelSchema {
    pub fn new(title: String, fields: Vec<Field>) -> Self {
        let index = fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        ModelSchema { title, fields, index }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index.get(name).map(|i| &self.fields[*i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// JSON Schema of the model, for client-side form generation.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for f in &self.fields {
            let mut prop = Map::new();
            prop.insert("title".into(), json!(f.title));
            if let Some(t) = f.field_type.json_schema_type() {
                prop.insert("type".into(), json!(t));
            }
            if let Some(n) = f.rule.max_length {
                prop.insert("maxLength".into(), json!(n));
            }
            if let Some(n) = f.rule.min_length {
                prop.insert("minLength".into(), json!(n));
            }
            if let Some(p) = &f.rule.pattern {
                prop.insert("pattern".into(), json!(p));
            }
            if let Some(n) = f.rule.minimum {
                prop.insert("minimum".into(), json!(n));
            }
            if let Some(n) = f.rule.maximum {
                prop.insert("maximum".into(), json!(n));
            }
            if let Some(values) = &f.rule.allowed {
                prop.insert("enum".into(), json!(values));
            }
            if let Some(format) = &f.rule.format {
                prop.insert("format".into(), json!(format));
            }
            if let Some(d) = &f.default {
                prop.insert("default".into(), d.clone());
            }
            if f.required {
                required.push(f.name.clone());
            }
            properties.insert(f.name.clone(), Value::Object(prop));
        }
        let mut schema = Map::new();
        schema.insert("title".into(), json!(self.title));
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), json!(required));
        }
        Value::Object(schema)
    }
}

pub type AddHook = Arc<dyn Fn(Map<String, Value>) -> Result<Map<String, Value>, AppError> + Send + Sync>;
pub type EditHook = Arc<dyn Fn(i64, Map<String, Value>) -> Result<Map<String, Value>, AppError> + Send + Sync>;

/// Immutable per-resource configuration shared by every request.
#[derive(Clone)]
pub struct Resource {
    pub table: String,
    pub table_as: Option<String>,
    pub single_title: String,
    pub pk_field: String,
    pub actions: Actions,
    pub model: ModelSchema,
    pub browse_fields: Vec<String>,
    pub retrieve_fields: Vec<String>,
    pub order_by: Vec<OrderField>,
    pub page_size: u32,
    pub filters: Vec<(String, Value)>,
    pub join: Option<String>,
    pub prepare_add_data: Option<AddHook>,
    pub prepare_edit_data: Option<EditHook>,
}

impl Resource {
    /// Primary key reference, qualified by the table alias when there is one.
    pub fn pk_ref(&self) -> String {
        match &self.table_as {
            Some(alias) => format!("{}.{}", alias, self.pk_field),
            None => self.pk_field.clone(),
        }
    }

    pub fn enabled(&self, action: Action) -> bool {
        self.actions.contains(action)
    }

    pub fn with_add_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Map<String, Value>, AppError> + Send + Sync + 'static,
    {
        self.prepare_add_data = Some(Arc::new(hook));
        self
    }

    pub fn with_edit_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(i64, Map<String, Value>) -> Result<Map<String, Value>, AppError> + Send + Sync + 'static,
    {
        self.prepare_edit_data = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("table", &self.table)
            .field("table_as", &self.table_as)
            .field("pk_field", &self.pk_field)
            .field("actions", &self.actions)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

pub(crate) fn field_title(name: &str) -> String {
    to_title_case(&name.replace('_', " "))
}
