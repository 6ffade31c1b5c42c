//! Configuration Module - Searches, filters and session tuning from TOML
//!
//! Loaded once at startup and handed to each session by value:
//! - shared, ordered filter rules
//! - per-session search lists (one request per job × location)
//! - per-session pagination, retry and pacing knobs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::{FilterRule, MatchMode};
use crate::record::{RecordField, SearchRequest};
use crate::retry::RetryPolicy;
use crate::session::{SessionPlan, SessionSettings};
use crate::store::JsonFileSink;

/// Jobot Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    /// Filter rules applied, in order, to every session
    pub filters: Vec<FilterConfig>,
    /// Named sessions (one per source)
    pub sessions: BTreeMap<String, SessionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Root directory for per-record fallback files
    pub fallback_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            fallback_dir: PathBuf::from("jobs"),
        }
    }
}

/// A keyword list entry: either a bare keyword or a named group of keywords
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordEntry {
    Keyword(String),
    Group(KeywordGroup),
}

/// Named keyword lists (`{ languages = [..], tools = [..] }`), kept in the
/// order they were written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordGroup(Vec<(String, Vec<String>)>);

impl KeywordGroup {
    pub fn new(groups: Vec<(String, Vec<String>)>) -> Self {
        Self(groups)
    }

    pub fn keywords(&self) -> impl Iterator<Item = &String> {
        self.0.iter().flat_map(|(_, keywords)| keywords)
    }
}

impl Serialize for KeywordGroup {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, keywords) in &self.0 {
            map.serialize_entry(name, keywords)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for KeywordGroup {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct GroupVisitor;

        impl<'de> serde::de::Visitor<'de> for GroupVisitor {
            type Value = KeywordGroup;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a table of keyword lists")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<KeywordGroup, A::Error> {
                let mut groups = Vec::new();
                while let Some(entry) = map.next_entry::<String, Vec<String>>()? {
                    groups.push(entry);
                }
                Ok(KeywordGroup(groups))
            }
        }

        deserializer.deserialize_map(GroupVisitor)
    }
}

fn flatten_keywords(entries: &[KeywordEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| match entry {
            KeywordEntry::Keyword(k) => vec![k.clone()],
            KeywordEntry::Group(group) => group.keywords().cloned().collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Record attribute: title, description, location, company, url or a detail key
    pub key: String,
    #[serde(default)]
    pub include: Vec<KeywordEntry>,
    #[serde(default)]
    pub exclude: Vec<KeywordEntry>,
    /// Require every include keyword instead of any
    #[serde(default)]
    pub full_match: bool,
}

impl FilterConfig {
    pub fn to_rule(&self) -> FilterRule {
        FilterRule::new(RecordField::parse(&self.key))
            .include(flatten_keywords(&self.include))
            .exclude(flatten_keywords(&self.exclude))
            .match_mode(if self.full_match {
                MatchMode::All
            } else {
                MatchMode::Any
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub job: String,
    #[serde(default)]
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Owning collection; defaults to the session name
    pub collection: Option<String>,
    /// Maximum pages per search (unset = unlimited)
    pub page_ceiling: Option<u32>,
    pub page_attempts: u32,
    /// Give up when an interrupt stays up this long (unset = wait forever)
    pub interrupt_timeout_secs: Option<u64>,
    pub monitor_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub recover_fallback: bool,
    pub retry: RetryPolicy,
    pub searches: Vec<SearchConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            collection: None,
            page_ceiling: settings.page_ceiling,
            page_attempts: settings.page_attempts,
            interrupt_timeout_secs: None,
            monitor_interval_ms: settings.monitor_interval.as_millis() as u64,
            settle_delay_ms: settings.settle_delay.as_millis() as u64,
            recover_fallback: settings.recover_fallback,
            retry: settings.retry,
            searches: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings::default()
            .with_page_ceiling(self.page_ceiling)
            .with_page_attempts(self.page_attempts)
            .with_retry(self.retry)
            .with_interrupt_timeout(self.interrupt_timeout_secs.map(Duration::from_secs))
            .with_monitor_interval(Duration::from_millis(self.monitor_interval_ms))
            .with_settle_delay(Duration::from_millis(self.settle_delay_ms))
            .with_recover_fallback(self.recover_fallback)
    }

    /// One request per (job, location); a job without locations searches everywhere
    pub fn search_requests(&self) -> Vec<SearchRequest> {
        self.searches
            .iter()
            .flat_map(|search| {
                if search.locations.is_empty() {
                    vec![SearchRequest::new(search.job.clone(), None)]
                } else {
                    search
                        .locations
                        .iter()
                        .map(|location| {
                            SearchRequest::new(search.job.clone(), Some(location.clone()))
                        })
                        .collect()
                }
            })
            .collect()
    }
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        Self::load_from(&Self::default_path()).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "jobot", "jobot")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("jobot.toml"))
    }

    pub fn session(&self, name: &str) -> Result<&SessionConfig> {
        self.sessions.get(name).with_context(|| {
            format!(
                "Session \"{}\" not found in configuration (known: {})",
                name,
                self.sessions.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    pub fn searches(&self, session: &str) -> Result<Vec<SearchRequest>> {
        Ok(self.session(session)?.search_requests())
    }

    pub fn filters(&self) -> Vec<FilterRule> {
        self.filters.iter().map(FilterConfig::to_rule).collect()
    }

    /// Collection a session persists into
    pub fn collection(&self, session: &str) -> Result<String> {
        Ok(self
            .session(session)?
            .collection
            .clone()
            .unwrap_or_else(|| session.to_string()))
    }

    /// Resolve everything a session needs to run
    pub fn session_plan(&self, session: &str) -> Result<SessionPlan> {
        let config = self.session(session)?;
        Ok(SessionPlan {
            collection: self.collection(session)?,
            searches: config.search_requests(),
            filters: self.filters(),
            settings: config.settings(),
        })
    }

    pub fn fallback_sink(&self) -> JsonFileSink {
        JsonFileSink::new(self.general.fallback_dir.clone())
    }
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# Jobot Configuration

[general]
# Log level: trace, debug, info, warn, error
log_level = "info"

# Records the store rejects are kept here, one JSON file per id
fallback_dir = "jobs"

# Filters run in order; a record must pass all of them.
# key: title, description, location, company, url, or a detail key
[[filters]]
key = "title"
include = [{ languages = ["python", "rust"] }, "backend"]
exclude = [{ seniority = ["senior", "lead"] }]
# true: every include keyword must appear; false: any of them
full_match = false

[[filters]]
key = "location"
exclude = ["on-site"]

[sessions.indeed]
collection = "IndeedBot"

# Stop after this many pages per search (remove for no limit)
page_ceiling = 3

# Re-list a page this many times when a listing keeps failing
page_attempts = 2

# Abort when a challenge screen stays up longer than this
interrupt_timeout_secs = 900

monitor_interval_ms = 1000
settle_delay_ms = 5000

# Re-send records left in fallback files by earlier runs
recover_fallback = true

[sessions.indeed.retry]
max_attempts = 3
base_delay_secs = 5

[[sessions.indeed.searches]]
job = "python developer"
locations = ["Remote", "São Paulo"]

[[sessions.indeed.searches]]
job = "rust engineer"
"#
    .to_string()
}
