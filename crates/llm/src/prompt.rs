//! Chat messages and judge prompt templates
//!
//! Every judge prompt ends with the exact JSON shape expected back; the
//! protocol in [`crate::judge`] enforces it.

use std::fmt;

use serde::{Deserialize, Serialize};
use verso_core::{Item, Strategy};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

const SYSTEM: &str = "You are a precise research assistant that evaluates how well source \
passages support a writing topic. You answer with exactly one JSON object and nothing else: \
no prose, no markdown fences.";

/// Score a batch of items against a topic
pub fn score_items(topic: &str, items: &[Item]) -> Vec<Message> {
    let mut listing = String::new();
    for item in items {
        listing.push_str(&format!("- [{}] {}\n", item.id, item.text.trim()));
    }

    let user = format!(
        "Topic: \"{topic}\"\n\n\
         Rate each passage below for how relevant and useful it is to the topic, on a scale \
         from 1 (irrelevant) to 10 (directly on point). Also give an overall score for the set \
         and a short overall rationale naming what is missing.\n\n\
         Passages:\n{listing}\n\
         Respond with:\n\
         {{\"overall_score\": <number 1-10>, \"overall_rationale\": \"<text>\", \
         \"item_scores\": {{\"<passage id exactly as given>\": {{\"score\": <number 1-10>, \
         \"rationale\": \"<text>\"}}}}}}"
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}

/// Yes/no: does a stored strategy fit this query?
pub fn applicability(query: &str, strategy: &Strategy) -> Vec<Message> {
    let user = format!(
        "A search strategy was triggered by the keyword \"{trigger}\". It expands the search \
         with this theme: \"{expansion}\".\n\n\
         Query: \"{query}\"\n\n\
         Does this theme genuinely fit the query, rather than only sharing the keyword?\n\
         Respond with: {{\"applicable\": true}} or {{\"applicable\": false}}",
        trigger = strategy.trigger,
        expansion = strategy.expansion_text,
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}

/// Propose an expansion theme for a failing query
pub fn propose_expansion(query: &str, rationale: &str, previous: Option<&str>) -> Vec<Message> {
    let mut user = format!(
        "A passage search for the query \"{query}\" returned weak results. The evaluator \
         said: \"{rationale}\"\n\n\
         Propose a short, concrete description of the theme the search should expand into so \
         that better passages are found. One or two sentences."
    );
    if let Some(prev) = previous {
        user.push_str(&format!(
            "\n\nA previous proposal did not help; propose something different from: \"{prev}\""
        ));
    }
    user.push_str("\n\nRespond with: {\"expansion\": \"<text>\"}");

    vec![Message::system(SYSTEM), Message::user(user)]
}

/// Derive trigger keywords from an expansion theme
pub fn derive_keywords(expansion: &str) -> Vec<Message> {
    let user = format!(
        "Expansion theme: \"{expansion}\"\n\n\
         Give one or two single lowercase words that a future query would contain when this \
         theme applies.\n\
         Respond with: {{\"keywords\": [\"<word>\", \"<word>\"]}}"
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}

/// Ask for a more specific keyword when the first one is taken
pub fn disambiguate_keyword(keyword: &str, expansion: &str) -> Vec<Message> {
    let user = format!(
        "The keyword \"{keyword}\" already names a different strategy. Give one more specific \
         lowercase keyword (a single word or words joined with underscores) for this theme: \
         \"{expansion}\"\n\
         Respond with: {{\"keyword\": \"<word>\"}}"
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}

/// Self-correction round-trip after an unparseable reply
pub fn correction(original: &[Message], raw: &str) -> Vec<Message> {
    let mut messages = original.to_vec();
    messages.push(Message::assistant(raw));
    messages.push(Message::user(
        "Your reply was not a valid JSON object. Return only the corrected JSON object with \
         the requested keys, nothing else.",
    ));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use verso_core::ItemOrigin;

    #[test]
    fn test_score_prompt_lists_every_item() {
        let items = vec![
            Item::new("Room. 12:1", "first", ItemOrigin::Retrieved),
            Item::new("Ef. 4:11", "second", ItemOrigin::Retrieved),
        ];
        let msgs = score_items("Calling", &items);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[1].content.contains("[Room. 12:1] first"));
        assert!(msgs[1].content.contains("[Ef. 4:11] second"));
        assert!(msgs[1].content.contains("\"item_scores\""));
    }

    #[test]
    fn test_proposal_mentions_previous() {
        let msgs = propose_expansion("q", "too vague", Some("old idea"));
        assert!(msgs[1].content.contains("old idea"));
        let msgs = propose_expansion("q", "too vague", None);
        assert!(!msgs[1].content.contains("previous"));
    }

    #[test]
    fn test_correction_replays_raw_reply() {
        let original = derive_keywords("theme");
        let msgs = correction(&original, "not json");
        assert_eq!(msgs.len(), original.len() + 2);
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(msgs[2].content, "not json");
        assert_eq!(msgs[3].role, Role::User);
    }
}
