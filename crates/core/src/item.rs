//! Retrievable items and per-section candidate bookkeeping

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// How an item entered a section's result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    /// Explicitly cited in the query text; never evicted
    Mandatory,
    /// Produced by the hybrid retriever
    Retrieved,
    /// Produced by a centroid refinement search
    Refinement,
}

/// A retrievable unit of source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable reference string (e.g. `"Room. 12:1-2"`)
    pub id: String,
    /// Body text
    pub text: String,
    /// Judge-assigned quality (1.0 - 10.0), if scored
    #[serde(default)]
    pub score: Option<f32>,
    /// Judge rationale for the score
    #[serde(default)]
    pub rationale: Option<String>,
    /// Where the item came from
    pub origin: ItemOrigin,
}

impl Item {
    /// Create an unscored item
    pub fn new(id: impl Into<String>, text: impl Into<String>, origin: ItemOrigin) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score: None,
            rationale: None,
            origin,
        }
    }

    /// Create an unscored mandatory item
    pub fn mandatory(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, text, ItemOrigin::Mandatory)
    }

    /// Attach a score (builder style)
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Whether this item is exempt from eviction
    pub fn is_mandatory(&self) -> bool {
        self.origin == ItemOrigin::Mandatory
    }

    /// Score if it is a finite number
    pub fn valid_score(&self) -> Option<f32> {
        self.score.filter(|s| s.is_finite())
    }
}

/// Ordered items from one retrieval call; insertion order is rank order
///
/// Duplicate ids are rejected on insertion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    items: Vec<Item>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item; returns false if its id is already present
    pub fn push(&mut self, item: Item) -> bool {
        if self.contains(&item.id) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Append many items, skipping duplicates; returns the number added
    pub fn extend(&mut self, items: impl IntoIterator<Item = Item>) -> usize {
        let mut added = 0;
        for item in items {
            if self.push(item) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }

    pub fn as_slice(&self) -> &[Item] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Item> {
        self.items
    }
}

impl FromIterator<Item> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = Item>>(iter: T) -> Self {
        let mut set = CandidateSet::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for CandidateSet {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Every id already surfaced for one section
///
/// Grows monotonically; owned by a single section run.
#[derive(Debug, Clone, Default)]
pub struct SeenIdSet {
    ids: HashSet<String>,
}

impl SeenIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id; returns true if it was not seen before
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn extend<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }
}
