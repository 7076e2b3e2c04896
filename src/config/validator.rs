//! Resource config validation: identifiers, field uniqueness, sizes.

use crate::config::ResourceSpec;
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("static regex")
    })
}

fn invalid(spec: &ResourceSpec, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidResource {
        resource: spec.table.clone(),
        message: message.into(),
    }
}

fn check_ident(spec: &ResourceSpec, kind: &str, name: &str) -> Result<(), ConfigError> {
    if identifier().is_match(name) {
        Ok(())
    } else {
        Err(invalid(spec, format!("invalid {} '{}'", kind, name)))
    }
}

pub fn validate(spec: &ResourceSpec) -> Result<(), ConfigError> {
    if spec.table.trim().is_empty() {
        return Err(invalid(spec, "table required"));
    }
    check_ident(spec, "table", &spec.table)?;
    if let Some(alias) = &spec.table_as {
        check_ident(spec, "table alias", alias)?;
    }
    check_ident(spec, "primary key field", &spec.pk_field)?;
    if spec.page_size == 0 {
        return Err(invalid(spec, "page_size must be greater than 0"));
    }

    let mut names = HashSet::new();
    for f in &spec.model.fields {
        check_ident(spec, "field", &f.name)?;
        if f.name == spec.pk_field {
            return Err(invalid(
                spec,
                format!("primary key field '{}' must not be declared in the model", f.name),
            ));
        }
        if !names.insert(f.name.as_str()) {
            return Err(invalid(spec, format!("duplicate field '{}'", f.name)));
        }
        if let (Some(min), Some(max)) = (f.rule.min_length, f.rule.max_length) {
            if min > max {
                return Err(invalid(spec, format!("field '{}': min_length > max_length", f.name)));
            }
        }
    }

    for name in spec.browse_fields.iter().chain(spec.retrieve_fields.iter()).flatten() {
        check_ident(spec, "select field", name)?;
    }
    for order in &spec.browse_order_by {
        check_ident(spec, "order field", order.strip_prefix('-').unwrap_or(order))?;
    }
    for filter in &spec.filters {
        check_ident(spec, "filter field", &filter.field)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldSpec, FieldType, FilterSpec};
    use serde_json::json;

    fn spec() -> ResourceSpec {
        let mut spec = ResourceSpec::new("organisations");
        spec.model.fields = vec![
            FieldSpec::new("name", FieldType::String),
            FieldSpec::new("slug", FieldType::String),
        ];
        spec
    }

    #[test]
    fn accepts_plain_resource() {
        let mut s = spec();
        s.table_as = Some("o".into());
        s.browse_order_by = vec!["-o.slug".into()];
        s.filters = vec![FilterSpec {
            field: "o.active".into(),
            value: json!(true),
        }];
        assert!(validate(&s).is_ok());
    }

    #[test]
    fn rejects_bad_resources() {
        let mut s = spec();
        s.model.fields.push(FieldSpec::new("name", FieldType::Integer));
        assert!(validate(&s).unwrap_err().to_string().contains("duplicate field 'name'"));

        let mut s = spec();
        s.model.fields.push(FieldSpec::new("id", FieldType::Integer));
        assert!(validate(&s).is_err());

        let mut s = spec();
        s.page_size = 0;
        assert!(validate(&s).is_err());

        let mut s = spec();
        s.browse_order_by = vec!["slug; drop table x".into()];
        assert!(validate(&s).is_err());

        assert!(validate(&ResourceSpec::new(" ")).is_err());
    }
}
