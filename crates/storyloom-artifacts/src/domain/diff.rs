//! Type-aware structural diff between two versions' content.
//!
//! Pure: takes two JSON documents and returns a list of changes. Collections
//! with natural identities are matched by key rather than by position, so
//! reordering characters or chapters does not read as a rewrite.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use storyloom_core::model::ArtifactType;

/// One difference between two documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Added { path: String, value: Value },
    Removed { path: String, value: Value },
    Changed { path: String, from: Value, to: Value },
}

impl Change {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Removed { path, .. } | Self::Changed { path, .. } => {
                path
            }
        }
    }
}

/// Result of [`compare`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactDiff {
    pub artifact_type: ArtifactType,
    pub changes: Vec<Change>,
}

impl ArtifactDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A keyed collection inside an artifact's content.
struct Collection {
    field: &'static str,
    key: fn(&Value) -> Option<String>,
}

fn collection_for(artifact_type: ArtifactType) -> Option<Collection> {
    match artifact_type {
        ArtifactType::Characters => Some(Collection {
            field: "characters",
            key: character_key,
        }),
        ArtifactType::Outline => Some(Collection {
            field: "chapters",
            key: chapter_key,
        }),
        ArtifactType::Worldview | ArtifactType::Foundation => None,
    }
}

fn character_key(item: &Value) -> Option<String> {
    item.get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
}

fn chapter_key(item: &Value) -> Option<String> {
    match item.get("index") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        _ => item
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned),
    }
}

/// Compares two versions of an artifact of `artifact_type`.
///
/// `characters` content is matched by character `name`, `outline` content by
/// chapter `index` (falling back to `title`). Every other top-level field is
/// compared by value. Content that is not a JSON object is compared as a
/// whole under the path `$`.
#[must_use]
pub fn compare(artifact_type: ArtifactType, from: &Value, to: &Value) -> ArtifactDiff {
    let mut changes = Vec::new();
    let collection = collection_for(artifact_type);

    match (as_document(from), as_document(to), &collection) {
        // A bare array is the collection itself.
        (Document::Items(from_items), Document::Items(to_items), Some(c)) => {
            diff_collection(c, from_items, to_items, &mut changes);
        }
        (Document::Object(from_obj), Document::Object(to_obj), _) => {
            let skip = collection.as_ref().map(|c| c.field);
            diff_fields(from_obj, to_obj, skip, &mut changes);
            if let Some(c) = &collection {
                diff_collection(
                    c,
                    array_field(from_obj, c.field),
                    array_field(to_obj, c.field),
                    &mut changes,
                );
            }
        }
        _ => {
            if from != to {
                changes.push(whole_document_change(from, to));
            }
        }
    }

    ArtifactDiff {
        artifact_type,
        changes,
    }
}

enum Document<'a> {
    Object(&'a Map<String, Value>),
    Items(&'a [Value]),
    Other,
}

fn as_document(value: &Value) -> Document<'_> {
    match value {
        Value::Object(map) => Document::Object(map),
        Value::Array(items) => Document::Items(items),
        _ => Document::Other,
    }
}

fn whole_document_change(from: &Value, to: &Value) -> Change {
    let path = "$".to_owned();
    match (from, to) {
        (Value::Null, _) => Change::Added {
            path,
            value: to.clone(),
        },
        (_, Value::Null) => Change::Removed {
            path,
            value: from.clone(),
        },
        _ => Change::Changed {
            path,
            from: from.clone(),
            to: to.clone(),
        },
    }
}

fn array_field<'a>(obj: &'a Map<String, Value>, field: &str) -> &'a [Value] {
    obj.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn diff_fields(
    from: &Map<String, Value>,
    to: &Map<String, Value>,
    skip: Option<&str>,
    changes: &mut Vec<Change>,
) {
    for (field, new) in to {
        if Some(field.as_str()) == skip {
            continue;
        }
        match from.get(field) {
            None => changes.push(Change::Added {
                path: field.clone(),
                value: new.clone(),
            }),
            Some(old) if old != new => changes.push(Change::Changed {
                path: field.clone(),
                from: old.clone(),
                to: new.clone(),
            }),
            Some(_) => {}
        }
    }
    for (field, old) in from {
        if Some(field.as_str()) == skip || to.contains_key(field) {
            continue;
        }
        changes.push(Change::Removed {
            path: field.clone(),
            value: old.clone(),
        });
    }
}

/// Items without a usable key are identified by position as `#<n>`.
fn keyed<'a>(collection: &Collection, items: &'a [Value]) -> Vec<(String, &'a Value)> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| ((collection.key)(item).unwrap_or_else(|| format!("#{i}")), item))
        .collect()
}

fn diff_collection(
    collection: &Collection,
    from: &[Value],
    to: &[Value],
    changes: &mut Vec<Change>,
) {
    let from_keyed = keyed(collection, from);
    let to_keyed = keyed(collection, to);
    let from_index: HashMap<&str, &Value> =
        from_keyed.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let to_index: HashMap<&str, &Value> = to_keyed.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let path = |key: &str| format!("{}/{key}", collection.field);

    for (key, new) in &to_keyed {
        match from_index.get(key.as_str()) {
            None => changes.push(Change::Added {
                path: path(key),
                value: (*new).clone(),
            }),
            Some(old) if old != new => changes.push(Change::Changed {
                path: path(key),
                from: (*old).clone(),
                to: (*new).clone(),
            }),
            Some(_) => {}
        }
    }
    for (key, old) in &from_keyed {
        if !to_index.contains_key(key.as_str()) {
            changes.push(Change::Removed {
                path: path(key),
                value: (*old).clone(),
            });
        }
    }
}
