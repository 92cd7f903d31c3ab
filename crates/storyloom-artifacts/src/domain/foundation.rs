//! Project fields carried by a foundation artifact.

use serde_json::Value;
use storyloom_core::error::DomainError;

/// Descriptive project fields extracted from foundation content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundationDetails {
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
}

impl FoundationDetails {
    /// Extracts and validates the fields an activated foundation propagates
    /// onto its project.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `title` is missing or blank, or if
    /// `description`/`genre` are present but not strings.
    pub fn from_content(content: &Value) -> Result<Self, DomainError> {
        let title = content
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DomainError::Validation("foundation content requires a non-empty title".into())
            })?;

        Ok(Self {
            title: title.to_owned(),
            description: optional_string(content, "description")?,
            genre: optional_string(content, "genre")?,
        })
    }
}

fn optional_string(content: &Value, field: &str) -> Result<Option<String>, DomainError> {
    match content.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_owned())),
        Some(_) => Err(DomainError::Validation(format!(
            "foundation field {field} must be a string"
        ))),
    }
}
