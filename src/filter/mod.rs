//! Filter Engine - Include/exclude keyword rules over record attributes
//!
//! Text and keywords are both normalized (NFKD, diacritics dropped,
//! lowercased, whitespace collapsed) and keywords match as whole words, so
//! "Remoto" matches "remoto" and "Python" does not match "PythonRemote".

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::FilterError;
use crate::record::{Record, RecordField};

/// How include keywords combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one include keyword must match
    #[default]
    Any,
    /// Every include keyword must match
    All,
}

/// One include/exclude rule over a record attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub key: RecordField,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
}

impl FilterRule {
    pub fn new(key: RecordField) -> Self {
        Self {
            key,
            include: Vec::new(),
            exclude: Vec::new(),
            match_mode: MatchMode::Any,
        }
    }

    pub fn include<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }
}

/// Case-fold, strip diacritics and collapse whitespace.
///
/// Characters with no ASCII decomposition are dropped.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(char::is_ascii)
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct CompiledRule {
    key: RecordField,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    match_mode: MatchMode,
}

impl CompiledRule {
    fn compile(index: usize, rule: &FilterRule) -> Result<Self, FilterError> {
        Ok(Self {
            key: rule.key.clone(),
            include: compile_keywords(index, &rule.include)?,
            exclude: compile_keywords(index, &rule.exclude)?,
            match_mode: rule.match_mode,
        })
    }

    fn passes(&self, record: &Record) -> bool {
        let text = record
            .attribute(&self.key)
            .map(|t| normalize_text(&t))
            .unwrap_or_default();

        let include_satisfied = if self.include.is_empty() {
            true
        } else {
            match self.match_mode {
                MatchMode::Any => self.include.iter().any(|re| re.is_match(&text)),
                MatchMode::All => self.include.iter().all(|re| re.is_match(&text)),
            }
        };
        let exclude_satisfied = self.exclude.iter().any(|re| re.is_match(&text));

        include_satisfied && !exclude_satisfied
    }
}

fn compile_keywords(index: usize, keywords: &[String]) -> Result<Vec<Regex>, FilterError> {
    keywords
        .iter()
        .map(|k| normalize_text(k))
        .filter(|k| !k.is_empty())
        .map(|keyword| {
            Regex::new(&keyword_pattern(&keyword)).map_err(|source| FilterError::InvalidKeyword {
                rule: index,
                keyword,
                source,
            })
        })
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whole-token pattern for a normalized keyword.
///
/// `\b` only holds next to a word character, so an edge like the `+` in
/// `c++` is bounded by a non-word character or the end of the text instead.
fn keyword_pattern(keyword: &str) -> String {
    let starts_with_word = keyword.chars().next().is_some_and(is_word_char);
    let ends_with_word = keyword.chars().last().is_some_and(is_word_char);
    format!(
        "{}{}{}",
        if starts_with_word { r"\b" } else { r"(?:^|\W)" },
        regex::escape(keyword),
        if ends_with_word { r"\b" } else { r"(?:\W|$)" },
    )
}

/// Compiled, ordered rule set. Evaluation is pure: it depends only on the
/// record and the rules.
pub struct FilterEngine {
    rules: Vec<CompiledRule>,
}

impl FilterEngine {
    pub fn new(rules: &[FilterRule]) -> Result<Self, FilterError> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| CompiledRule::compile(i + 1, rule))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Engine that accepts everything
    pub fn accept_all() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True iff every rule passes. Stops at the first failing rule.
    pub fn accepts(&self, record: &Record) -> bool {
        self.first_failure(record).is_none()
    }

    /// 1-based index of the first rule the record fails
    pub fn first_failure(&self, record: &Record) -> Option<usize> {
        let failed = self
            .rules
            .iter()
            .position(|rule| !rule.passes(record))
            .map(|i| i + 1);

        if let Some(index) = failed {
            debug!(
                "Record {} failed filter {} of {} ({})",
                record.id,
                index,
                self.rules.len(),
                self.rules[index - 1].key
            );
        }
        failed
    }
}

/// One-shot evaluation of `rules` against `record`
pub fn accepts(record: &Record, rules: &[FilterRule]) -> Result<bool, FilterError> {
    Ok(FilterEngine::new(rules)?.accepts(record))
}
