//! Payload validation against a resolved model schema.
//!
//! Values are coerced to the field type first (integer strings become
//! integers, and so on), then checked against the field's rules. Every
//! failing field is reported, each as a `{loc, msg, type}` descriptor.

use crate::config::{Field, FieldType, ModelSchema};
use crate::response::FieldError;
use serde_json::{Map, Number, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Full validation: every declared field is resolved, missing optional
    /// fields take their default (or null). Unknown keys are ignored.
    pub fn validate(model: &ModelSchema, body: &Value) -> Result<Map<String, Value>, Vec<FieldError>> {
        let obj = as_object(body)?;
        let mut out = Map::new();
        let mut errors = Vec::new();
        for field in &model.fields {
            match obj.get(&field.name) {
                Some(v) => match validate_field(field, v) {
                    Ok(v) => {
                        out.insert(field.name.clone(), v);
                    }
                    Err(e) => errors.push(e),
                },
                None if field.required => errors.push(FieldError::new(
                    &field.name,
                    "field required",
                    "value_error.missing",
                )),
                None => {
                    out.insert(field.name.clone(), field.default.clone().unwrap_or(Value::Null));
                }
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }

    /// Partial validation: only keys present in `body` that the model declares
    /// are validated and returned. Presence, not value, decides what is touched.
    pub fn validate_partial(
        model: &ModelSchema,
        body: &Map<String, Value>,
    ) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut out = Map::new();
        let mut errors = Vec::new();
        for field in model.fields.iter().filter(|f| body.contains_key(&f.name)) {
            let raw = &body[&field.name];
            match validate_field(field, raw) {
                Ok(v) => {
                    out.insert(field.name.clone(), v);
                }
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }
}

fn as_object(body: &Value) -> Result<&Map<String, Value>, Vec<FieldError>> {
    body.as_object().ok_or_else(|| {
        vec![FieldError::new("__root__", "value is not a valid dict", "type_error.dict")]
    })
}

fn validate_field(field: &Field, v: &Value) -> Result<Value, FieldError> {
    let err = |msg: String, kind: &str| FieldError::new(&field.name, msg, kind);
    if v.is_null() {
        return if field.nullable {
            Ok(Value::Null)
        } else {
            Err(err("none is not an allowed value".into(), "type_error.none.not_allowed"))
        };
    }
    let v = coerce(field.field_type, v).map_err(|(msg, kind)| err(msg.into(), kind))?;
    check_rules(field, &v).map_err(|(msg, kind)| err(msg, kind))?;
    Ok(v)
}

fn coerce(t: FieldType, v: &Value) -> Result<Value, (&'static str, &'static str)> {
    match t {
        FieldType::String => match v {
            Value::String(_) => Ok(v.clone()),
            _ => Err(("str type expected", "type_error.str")),
        },
        FieldType::Integer => {
            let n = match v {
                Value::Number(n) if n.is_i64() => n.as_i64(),
                Value::Number(n) => n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15).map(|f| f as i64),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            n.map(|n| Value::Number(n.into()))
                .ok_or(("value is not a valid integer", "type_error.integer"))
        }
        FieldType::Float => {
            let f = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            f.and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or(("value is not a valid float", "type_error.float"))
        }
        FieldType::Boolean => {
            let b = match v {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                Value::String(s) => match s.to_lowercase().as_str() {
                    "1" | "on" | "t" | "true" | "y" | "yes" => Some(true),
                    "0" | "off" | "f" | "false" | "n" | "no" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            b.map(Value::Bool)
                .ok_or(("value could not be parsed to a boolean", "type_error.bool"))
        }
        FieldType::Json => Ok(v.clone()),
    }
}

fn check_rules(field: &Field, v: &Value) -> Result<(), (String, &'static str)> {
    let rule = &field.rule;
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err((
                    format!("ensure this value has at most {} characters", max),
                    "value_error.any_str.max_length",
                ));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err((
                    format!("ensure this value has at least {} characters", min),
                    "value_error.any_str.min_length",
                ));
            }
        }
        if let (Some(re), Some(pattern)) = (&field.pattern, &rule.pattern) {
            if !re.is_match(s) {
                return Err((
                    format!("string does not match regex \"{}\"", pattern),
                    "value_error.str.regex",
                ));
            }
        }
        if let Some(format) = &rule.format {
            validate_format(s, format)?;
        }
    }
    if let Some(n) = v.as_f64().filter(|_| v.is_number()) {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err((
                    format!("ensure this value is greater than or equal to {}", min),
                    "value_error.number.not_ge",
                ));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err((
                    format!("ensure this value is less than or equal to {}", max),
                    "value_error.number.not_le",
                ));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            let permitted: Vec<String> = allowed
                .iter()
                .map(|a| match a {
                    Value::String(s) => format!("'{}'", s),
                    other => other.to_string(),
                })
                .collect();
            return Err((
                format!("unexpected value; permitted: {}", permitted.join(", ")),
                "value_error.const",
            ));
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(s: &str, format: &str) -> Result<(), (String, &'static str)> {
    match format.to_lowercase().as_str() {
        "email" => {
            let valid = match s.split_once('@') {
                Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
                None => false,
            };
            if !valid {
                return Err(("value is not a valid email address".into(), "value_error.email"));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(("value is not a valid uuid".into(), "type_error.uuid"));
            }
        }
        _ => {}
    }
    Ok(())
}
