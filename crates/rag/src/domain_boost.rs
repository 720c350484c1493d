//! Title-derived term boosting
//!
//! Capitalized title tokens that appear in the domain vocabulary become
//! boost terms. A candidate gains `weight` per boost term it contains as a
//! whole word. Boosting reorders candidates; it never filters them.

use std::collections::{BTreeSet, HashSet};

use unicode_segmentation::UnicodeSegmentation;

/// Boost term derivation and scoring
#[derive(Debug, Clone)]
pub struct DomainBooster {
    stopwords: HashSet<String>,
    vocabulary: HashSet<String>,
    weight: f32,
}

impl DomainBooster {
    pub fn new<S, V>(stopwords: S, vocabulary: V, weight: f32) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        V: IntoIterator,
        V::Item: AsRef<str>,
    {
        Self {
            stopwords: stopwords
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
            vocabulary: vocabulary
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
            weight,
        }
    }

    pub fn from_config(config: &verso_config::RetrievalConfig) -> Self {
        Self::new(&config.stopwords, &config.vocabulary, config.boost_weight)
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Boost terms for a section title, lowercased and sorted
    pub fn boost_terms(&self, title: &str) -> BTreeSet<String> {
        title
            .unicode_words()
            .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
            .map(str::to_lowercase)
            .filter(|w| !self.stopwords.contains(w) && self.vocabulary.contains(w))
            .collect()
    }

    /// Boost terms occurring in `text` as whole words
    pub fn matched<'a>(&self, terms: &'a BTreeSet<String>, text: &str) -> Vec<&'a str> {
        if terms.is_empty() {
            return Vec::new();
        }
        let words: HashSet<String> = text.unicode_words().map(str::to_lowercase).collect();
        terms
            .iter()
            .filter(|t| words.contains(t.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Additive boost for `text`
    pub fn boost(&self, terms: &BTreeSet<String>, text: &str) -> f32 {
        self.weight * self.matched(terms, text).len() as f32
    }
}
