//! Raw resource config types as written in JSON or built in code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One BREAD action a resource can expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Browse,
    Retrieve,
    Add,
    Edit,
    Delete,
    AddOptions,
    EditOptions,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Browse => "browse",
            Action::Retrieve => "retrieve",
            Action::Add => "add",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::AddOptions => "add_options",
            Action::EditOptions => "edit_options",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Json,
}

impl FieldType {
    /// Cast applied to bound parameters so NULLs and numbers land in the right column type.
    pub fn pg_cast(&self) -> &'static str {
        match self {
            FieldType::String => "text",
            FieldType::Integer => "int8",
            FieldType::Float => "float8",
            FieldType::Boolean => "bool",
            FieldType::Json => "jsonb",
        }
    }

    pub fn json_schema_type(&self) -> Option<&'static str> {
        match self {
            FieldType::String => Some("string"),
            FieldType::Integer => Some("integer"),
            FieldType::Float => Some("number"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Json => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub rule: ValidationRule,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, type_: FieldType) -> Self {
        FieldSpec {
            name: name.into(),
            type_,
            nullable: false,
            default: None,
            rule: ValidationRule::default(),
        }
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.rule.max_length = Some(n);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, v: Value) -> Self {
        self.default = Some(v);
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Fixed equality predicate applied to every query of a resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    pub value: Value,
}

fn default_pk_field() -> String {
    "id".into()
}

fn default_page_size() -> u32 {
    50
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub table: String,
    #[serde(default)]
    pub table_as: Option<String>,
    /// Overrides the singular title derived from the table name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_pk_field")]
    pub pk_field: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub model: ModelSpec,
    #[serde(default)]
    pub browse_fields: Option<Vec<String>>,
    #[serde(default)]
    pub retrieve_fields: Option<Vec<String>>,
    #[serde(default)]
    pub browse_order_by: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub join: Option<String>,
}

impl ResourceSpec {
    pub fn new(table: impl Into<String>) -> Self {
        ResourceSpec {
            table: table.into(),
            table_as: None,
            name: None,
            pk_field: default_pk_field(),
            actions: Vec::new(),
            model: ModelSpec::default(),
            browse_fields: None,
            retrieve_fields: None,
            browse_order_by: Vec::new(),
            page_size: default_page_size(),
            filters: Vec::new(),
            join: None,
        }
    }
}
