//! Page controller capability - the browser as seen by the session
//!
//! The core never inspects markup; it only consumes presence, text and
//! attribute values through this port.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Detached snapshot of a located element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Selector the element was found with
    pub selector: String,
    /// Position among the selector's matches
    pub index: usize,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait PageController: Send + Sync {
    async fn present(&self, selector: &str) -> Result<bool>;

    async fn find(&self, selector: &str, timeout: Duration) -> Result<Option<Element>>;

    async fn find_all(&self, selector: &str, timeout: Duration) -> Result<Vec<Element>>;

    async fn click(&self, target: &Element) -> Result<()>;

    async fn type_text(&self, target: &Element, text: &str) -> Result<()>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Pacing delay that lets the page settle
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// `find` that treats absence as an error
    async fn require(&self, selector: &str, timeout: Duration) -> Result<Element> {
        self.find(selector, timeout)
            .await?
            .ok_or_else(|| anyhow!("element not found: {}", selector))
    }
}
