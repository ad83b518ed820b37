//! Topic catalog
//!
//! Static informational content keyed by conversational intent. The catalog is
//! consumed read-only by the intent router and the offline intent recognizer.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Embedded default catalog compiled into the binary
const EMBEDDED_CATALOG: &str = include_str!("../topics/catalog.json");

/// One informational topic card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    /// Stable identifier
    pub id: String,

    /// Card title
    pub title: String,

    /// Intent key that opens this topic
    pub intent_key: String,

    /// One-line description shown on the card
    #[serde(default)]
    pub summary: String,

    /// Full content shown when the topic is opened
    #[serde(default)]
    pub content: String,

    /// Trigger phrases for offline intent matching
    #[serde(default)]
    pub phrases: Vec<String>,
}

#[derive(Deserialize)]
struct CatalogFile {
    topics: Vec<TopicRecord>,
}

/// Lookup table from intent key to topic
#[derive(Debug, Clone, Default)]
pub struct TopicCatalog {
    topics: Vec<TopicRecord>,
    by_intent: HashMap<String, usize>,
}

impl TopicCatalog {
    /// Build a catalog from records
    ///
    /// When two records share an intent key the first one wins.
    #[must_use]
    pub fn from_records(topics: Vec<TopicRecord>) -> Self {
        let mut by_intent = HashMap::with_capacity(topics.len());
        for (index, topic) in topics.iter().enumerate() {
            if by_intent.contains_key(&topic.intent_key) {
                tracing::warn!(
                    intent = %topic.intent_key,
                    id = %topic.id,
                    "duplicate intent key in topic catalog, keeping first"
                );
                continue;
            }
            by_intent.insert(topic.intent_key.clone(), index);
        }

        Self { topics, by_intent }
    }

    /// The catalog compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if the embedded JSON is malformed
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    /// Parse a catalog from JSON (`{"topics": [...]}`)
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not match the catalog schema
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self::from_records(file.topics))
    }

    /// Parse a catalog from TOML (`[[topics]]` tables)
    ///
    /// # Errors
    ///
    /// Returns error if the TOML does not match the catalog schema
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        Ok(Self::from_records(file.topics))
    }

    /// Load a catalog file, choosing the format by extension (JSON preferred)
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content)?,
            Some("json") | None => Self::from_json(&content)?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "unsupported topic catalog format: .{other}"
                )));
            }
        };

        tracing::info!(
            path = %path.display(),
            topics = catalog.len(),
            "loaded topic catalog"
        );
        Ok(catalog)
    }

    /// The catalog at `path`, or the embedded one when no path is configured
    ///
    /// # Errors
    ///
    /// Returns error if the catalog cannot be loaded
    pub fn load_or_embedded(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(Self::embedded, Self::load)
    }

    /// Exact intent-key lookup
    #[must_use]
    pub fn get(&self, intent_key: &str) -> Option<&TopicRecord> {
        self.by_intent.get(intent_key).map(|&i| &self.topics[i])
    }

    /// All topics in catalog order
    #[must_use]
    pub fn topics(&self) -> &[TopicRecord] {
        &self.topics
    }

    /// Number of topics
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether the catalog has no topics
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, intent: &str) -> TopicRecord {
        TopicRecord {
            id: id.to_string(),
            title: id.to_uppercase(),
            intent_key: intent.to_string(),
            summary: String::new(),
            content: String::new(),
            phrases: Vec::new(),
        }
    }

    #[test]
    fn embedded_catalog_has_money_transfer_topic() {
        let catalog = TopicCatalog::embedded().unwrap();
        let topic = catalog.get("enviar-recibir-dinero").unwrap();
        assert_eq!(topic.id, "enviar-dinero");
        assert!(!topic.phrases.is_empty());
    }

    #[test]
    fn lookup_is_exact() {
        let catalog = TopicCatalog::from_records(vec![record("a", "pagar-servicios")]);
        assert!(catalog.get("pagar-servicios").is_some());
        assert!(catalog.get("pagar").is_none());
        assert!(catalog.get("Pagar-Servicios").is_none());
    }

    #[test]
    fn duplicate_intent_keeps_first() {
        let catalog =
            TopicCatalog::from_records(vec![record("first", "dup"), record("second", "dup")]);
        assert_eq!(catalog.get("dup").unwrap().id, "first");
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn toml_catalog() {
        let catalog = TopicCatalog::from_toml(
            r#"
            [[topics]]
            id = "x"
            title = "X"
            intentKey = "intent-x"
            "#,
        )
        .unwrap();
        assert_eq!(catalog.get("intent-x").unwrap().title, "X");
    }
}
