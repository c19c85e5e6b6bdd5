//! Write-time validation against a [`CollectionSchema`].

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::model::calendar_date;
use crate::schema::{CollectionSchema, FieldDef, FieldKind};

const REQUIRED: &str = "This field is required.";

/// Drafts skip required checks; everything else is checked in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Draft,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{} invalid field(s): {}", .0.len(), summarize(.0))]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.path.as_str()).collect()
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.path, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn validate(
    schema: &CollectionSchema,
    data: &JsonValue,
    mode: ValidationMode,
) -> Result<(), ValidationErrors> {
    let Some(obj) = data.as_object() else {
        return Err(ValidationErrors(vec![FieldError::new(
            "",
            "document must be an object",
        )]));
    };

    let mut errors = Vec::new();
    validate_fields(&schema.data_fields(), obj, "", mode, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Removes values held by fields whose visibility condition is false, so a
/// stored document never carries a stale hidden value.
pub fn strip_hidden(schema: &CollectionSchema, data: &mut JsonValue) {
    if let Some(obj) = data.as_object_mut() {
        strip_fields(&schema.data_fields(), obj);
    }
}

/// Drops `null` object entries at every depth. Validation reads `null` as
/// absent; this makes deserialization agree.
pub fn strip_nulls(data: &mut JsonValue) {
    match data {
        JsonValue::Object(obj) => {
            obj.retain(|_, v| !v.is_null());
            obj.values_mut().for_each(strip_nulls);
        }
        JsonValue::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

fn strip_fields(fields: &[&FieldDef], obj: &mut Map<String, JsonValue>) {
    let hidden: Vec<&str> = fields
        .iter()
        .filter(|f| f.condition.is_some_and(|c| !c.is_visible(obj)))
        .map(|f| f.name)
        .collect();
    for name in hidden {
        obj.remove(name);
    }

    for field in fields {
        let children: Vec<&FieldDef> = field.children().iter().collect();
        match (&field.kind, obj.get_mut(field.name)) {
            (FieldKind::Group { .. }, Some(JsonValue::Object(child))) => {
                strip_fields(&children, child);
            }
            (FieldKind::Array { .. }, Some(JsonValue::Array(rows))) => {
                for row in rows.iter_mut().filter_map(JsonValue::as_object_mut) {
                    strip_fields(&children, row);
                }
            }
            _ => {}
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn validate_fields(
    fields: &[&FieldDef],
    siblings: &Map<String, JsonValue>,
    prefix: &str,
    mode: ValidationMode,
    errors: &mut Vec<FieldError>,
) {
    for field in fields {
        if let Some(condition) = &field.condition {
            if !condition.is_visible(siblings) {
                continue;
            }
        }
        let path = join_path(prefix, field.name);
        let value = siblings.get(field.name).filter(|v| !v.is_null());
        validate_field(field, value, &path, mode, errors);
    }
}

fn validate_field(
    field: &FieldDef,
    value: Option<&JsonValue>,
    path: &str,
    mode: ValidationMode,
    errors: &mut Vec<FieldError>,
) {
    let required = field.required && mode == ValidationMode::Publish;
    let Some(value) = value else {
        if required {
            errors.push(FieldError::new(path, REQUIRED));
        }
        return;
    };

    match &field.kind {
        FieldKind::Text | FieldKind::Textarea => match value.as_str() {
            Some(s) if required && s.trim().is_empty() => errors.push(FieldError::new(path, REQUIRED)),
            Some(_) => {}
            None => errors.push(FieldError::new(path, "must be text")),
        },
        FieldKind::Email => match value.as_str() {
            Some(s) if s.trim().is_empty() => {
                if required {
                    errors.push(FieldError::new(path, REQUIRED));
                }
            }
            Some(s) if !looks_like_email(s) => {
                errors.push(FieldError::new(path, "must be a valid email address"))
            }
            Some(_) => {}
            None => errors.push(FieldError::new(path, "must be text")),
        },
        FieldKind::Number => {
            if !value.is_number() {
                errors.push(FieldError::new(path, "must be a number"));
            }
        }
        FieldKind::Checkbox => {
            if !value.is_boolean() {
                errors.push(FieldError::new(path, "must be true or false"));
            }
        }
        FieldKind::Date => match value.as_str() {
            Some(s) if calendar_date::parse(s).is_some() => {}
            _ => errors.push(FieldError::new(path, "must be a valid date")),
        },
        FieldKind::Select { options, has_many } => {
            let allowed = |s: &str| options.iter().any(|o| o.value == s);
            if *has_many {
                let Some(items) = value.as_array() else {
                    errors.push(FieldError::new(path, "must be a list of options"));
                    return;
                };
                if required && items.is_empty() {
                    errors.push(FieldError::new(path, REQUIRED));
                }
                let mut seen = HashSet::new();
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}.{i}");
                    match item.as_str() {
                        Some(s) if !allowed(s) => errors.push(FieldError::new(
                            &item_path,
                            format!("{s:?} is not a valid option"),
                        )),
                        Some(s) if !seen.insert(s) => errors.push(FieldError::new(
                            &item_path,
                            format!("{s:?} is selected more than once"),
                        )),
                        Some(_) => {}
                        None => errors.push(FieldError::new(&item_path, "must be an option value")),
                    }
                }
            } else {
                match value.as_str() {
                    Some(s) if allowed(s) => {}
                    Some(s) => {
                        errors.push(FieldError::new(path, format!("{s:?} is not a valid option")))
                    }
                    None => errors.push(FieldError::new(path, "must be an option value")),
                }
            }
        }
        FieldKind::Group { .. } => match value.as_object() {
            Some(obj) => {
                let children: Vec<&FieldDef> = field.children().iter().collect();
                validate_fields(&children, obj, path, mode, errors);
            }
            None => errors.push(FieldError::new(path, "must be an object")),
        },
        FieldKind::Array { .. } => {
            let Some(rows) = value.as_array() else {
                errors.push(FieldError::new(path, "must be a list"));
                return;
            };
            if required && rows.is_empty() {
                errors.push(FieldError::new(path, REQUIRED));
            }
            let children: Vec<&FieldDef> = field.children().iter().collect();
            for (i, row) in rows.iter().enumerate() {
                let row_path = format!("{path}.{i}");
                match row.as_object() {
                    Some(obj) => {
                        if obj.get("id").is_some_and(|id| !id.is_null() && !id.is_string()) {
                            errors.push(FieldError::new(&join_path(&row_path, "id"), "must be text"));
                        }
                        validate_fields(&children, obj, &row_path, mode, errors);
                    }
                    None => errors.push(FieldError::new(&row_path, "must be an object")),
                }
            }
        }
        FieldKind::Relationship { .. } => {
            let id = match value {
                JsonValue::String(s) => Some(s.as_str()),
                JsonValue::Object(obj) => obj.get("id").and_then(JsonValue::as_str),
                _ => None,
            };
            if id.map_or(true, str::is_empty) {
                errors.push(FieldError::new(path, "must reference a document id"));
            }
        }
        FieldKind::Blocks { blocks } => {
            let Some(items) = value.as_array() else {
                errors.push(FieldError::new(path, "must be a list of blocks"));
                return;
            };
            if required && items.is_empty() {
                errors.push(FieldError::new(path, REQUIRED));
            }
            for (i, item) in items.iter().enumerate() {
                let block_path = format!("{path}.{i}");
                match item.get("blockType").and_then(JsonValue::as_str) {
                    Some(slug) if blocks.iter().any(|b| b.slug == slug) => {}
                    Some(slug) => errors.push(FieldError::new(
                        &join_path(&block_path, "blockType"),
                        format!("{slug:?} is not a known block"),
                    )),
                    None => errors.push(FieldError::new(
                        &join_path(&block_path, "blockType"),
                        REQUIRED,
                    )),
                }
            }
        }
    }
}

fn looks_like_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
