//! Record module - Extracted entities and the requests that find them
//!
//! A `Record` is one uniquely identified listing (e.g. a job posting).
//! Identity is the `id`: two records with the same id are the same entity.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Element;

/// One extracted listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable, source-assigned identifier
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    /// Free-form source-specific attributes (benefits, detail sections, ...)
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            title: None,
            description: None,
            location: None,
            company: None,
            posted_at: None,
            details: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Text of a filterable attribute, `None` when the record doesn't carry it.
    ///
    /// Detail values that are lists are joined with spaces so every element
    /// participates in keyword matching.
    pub fn attribute(&self, field: &RecordField) -> Option<String> {
        match field {
            RecordField::Title => self.title.clone(),
            RecordField::Description => self.description.clone(),
            RecordField::Location => self.location.clone(),
            RecordField::Company => self.company.clone(),
            RecordField::Url => self.url.clone(),
            RecordField::Detail(key) => self.details.get(key).map(value_text),
        }
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Object(map) => map
            .values()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// A record attribute that filter rules can target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordField {
    Title,
    Description,
    Location,
    Company,
    Url,
    /// Key into `Record::details`
    Detail(String),
}

impl RecordField {
    /// Parse a config key. Anything that isn't a fixed field names a detail.
    pub fn parse(key: &str) -> Self {
        match key.trim().to_lowercase().as_str() {
            "title" => RecordField::Title,
            "description" => RecordField::Description,
            "location" => RecordField::Location,
            "company" => RecordField::Company,
            "url" => RecordField::Url,
            _ => RecordField::Detail(key.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordField::Title => "title",
            RecordField::Description => "description",
            RecordField::Location => "location",
            RecordField::Company => "company",
            RecordField::Url => "url",
            RecordField::Detail(key) => key,
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RecordField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordField {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        Ok(RecordField::parse(&key))
    }
}

/// One iteration of the outer search loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub term: String,
    pub location: Option<String>,
}

impl SearchRequest {
    pub fn new(term: impl Into<String>, location: Option<String>) -> Self {
        Self {
            term: term.into(),
            location,
        }
    }
}

impl fmt::Display for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} @ {}", self.term, location),
            None => write!(f, "{}", self.term),
        }
    }
}

/// A listed result that has not been extracted yet
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHandle {
    pub id: String,
    pub element: Element,
}

impl RecordHandle {
    pub fn new(id: impl Into<String>, element: Element) -> Self {
        Self {
            id: id.into(),
            element,
        }
    }
}

/// Whether the source session is authenticated.
///
/// Always set explicitly by the source's setup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginState {
    Anonymous,
    LoggedIn,
}

impl LoginState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, LoginState::LoggedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_parse() {
        assert_eq!(RecordField::parse("Title"), RecordField::Title);
        assert_eq!(RecordField::parse(" company "), RecordField::Company);
        assert_eq!(
            RecordField::parse("benefits"),
            RecordField::Detail("benefits".to_string())
        );
    }

    #[test]
    fn test_attribute_lookup() {
        let record = Record::new("1")
            .with_title("Rust Engineer")
            .with_detail("benefits", json!(["Health", "Remote work"]))
            .with_detail("easy_apply", json!(true));

        assert_eq!(
            record.attribute(&RecordField::Title).as_deref(),
            Some("Rust Engineer")
        );
        assert_eq!(record.attribute(&RecordField::Company), None);
        assert_eq!(
            record
                .attribute(&RecordField::Detail("benefits".into()))
                .as_deref(),
            Some("Health Remote work")
        );
        assert_eq!(
            record
                .attribute(&RecordField::Detail("easy_apply".into()))
                .as_deref(),
            Some("true")
        );
    }

    #[test]
    fn test_record_json_roundtrip_keeps_details() {
        let record = Record::new("abc")
            .with_url("https://example.com/viewjob?jk=abc")
            .with_detail("details", json!({"Job type": ["Full-time"]}));

        let json = serde_json::to_string_pretty(&record).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_search_request_display() {
        let request = SearchRequest::new("rust", Some("Remote".into()));
        assert_eq!(request.to_string(), "rust @ Remote");
        assert_eq!(SearchRequest::new("rust", None).to_string(), "rust");
    }
}
