//! Intent router: detected intent key → topic

use std::sync::Arc;

use crate::topics::{TopicCatalog, TopicRecord};

/// Callback that presents a topic to the user
pub type TopicOpener = Arc<dyn Fn(&TopicRecord) + Send + Sync>;

/// Maps intent keys to catalog topics
#[derive(Clone)]
pub struct IntentRouter {
    catalog: Arc<TopicCatalog>,
    opener: Option<TopicOpener>,
}

impl IntentRouter {
    /// Router that only resolves topics
    #[must_use]
    pub const fn new(catalog: Arc<TopicCatalog>) -> Self {
        Self {
            catalog,
            opener: None,
        }
    }

    /// Router that opens matched topics through `opener`
    #[must_use]
    pub fn with_opener(catalog: Arc<TopicCatalog>, opener: TopicOpener) -> Self {
        Self {
            catalog,
            opener: Some(opener),
        }
    }

    /// The topic catalog
    #[must_use]
    pub fn catalog(&self) -> &TopicCatalog {
        &self.catalog
    }

    /// Open the topic whose intent key equals `intent_key`
    ///
    /// Unmatched keys are a normal conversational path and only logged.
    pub fn route(&self, intent_key: &str) -> Option<&TopicRecord> {
        let Some(topic) = self.catalog.get(intent_key) else {
            tracing::debug!(intent = intent_key, "no topic for intent");
            return None;
        };

        tracing::info!(intent = intent_key, topic = %topic.id, "opening topic");
        if let Some(opener) = &self.opener {
            opener(topic);
        }
        Some(topic)
    }
}

impl std::fmt::Debug for IntentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentRouter")
            .field("topics", &self.catalog.len())
            .field("has_opener", &self.opener.is_some())
            .finish()
    }
}
