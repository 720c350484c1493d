//! Query-expansion strategies

use serde::{Deserialize, Serialize};

/// A keyword-triggered query-expansion rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    /// Trigger term, matched as a substring of the lower-cased query
    pub trigger: String,
    /// Description spliced into the embedding/rerank query
    pub expansion_text: String,
    /// Optional anchor ("seed") item whose text is spliced in as an example
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_item_id: Option<String>,
}

impl Strategy {
    /// Create a strategy; the trigger is stored lower-cased and trimmed
    pub fn new(trigger: impl AsRef<str>, expansion_text: impl Into<String>) -> Self {
        Self {
            trigger: normalize_trigger(trigger.as_ref()),
            expansion_text: expansion_text.into(),
            anchor_item_id: None,
        }
    }

    pub fn with_anchor(mut self, anchor_item_id: impl Into<String>) -> Self {
        self.anchor_item_id = Some(anchor_item_id.into());
        self
    }

    /// Whether the trigger occurs in an already lower-cased query
    pub fn matches(&self, lowercase_query: &str) -> bool {
        !self.trigger.is_empty() && lowercase_query.contains(self.trigger.as_str())
    }
}

/// Canonical form of a trigger key
pub fn normalize_trigger(trigger: &str) -> String {
    trigger.trim().to_lowercase()
}
