//! Strategy proposal for failing sections
//!
//! The judge writes a short expansion for the query, then names one or two
//! trigger keywords for it. Keywords never take over an existing trigger:
//! a colliding keyword is replaced by a judge-suggested variant, then by
//! `<keyword>_<first significant expansion word>`, then by a numeric suffix.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;
use verso_core::strategy::normalize_trigger;
use verso_core::{Judge, Strategy};
use verso_rag::StrategyStore;

use crate::AgentError;

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\d.]+\s*").expect("numbering pattern is a valid regex"));

/// Words kept in a fallback trigger
const FALLBACK_WORDS: usize = 4;

/// A proposed expansion and the triggers that will select it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub expansion: String,
    /// Unique, normalized triggers
    pub triggers: Vec<String>,
}

impl Proposal {
    pub fn strategies(&self) -> Vec<Strategy> {
        self.triggers
            .iter()
            .map(|t| Strategy::new(t, self.expansion.clone()))
            .collect()
    }
}

/// Strategy proposer
pub struct StrategyProposer {
    judge: Arc<dyn Judge>,
    store: Arc<StrategyStore>,
    stopwords: HashSet<String>,
}

impl StrategyProposer {
    pub fn new(judge: Arc<dyn Judge>, store: Arc<StrategyStore>) -> Self {
        Self::with_stopwords(judge, store, verso_config::constants::retrieval::STOPWORDS)
    }

    pub fn with_stopwords<I, S>(judge: Arc<dyn Judge>, store: Arc<StrategyStore>, stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            judge,
            store,
            stopwords: stopwords
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Propose a strategy for `query`
    ///
    /// `previous` is the last failed proposal for the same section; the
    /// judge is asked not to repeat it.
    pub async fn propose(
        &self,
        query: &str,
        rationale: &str,
        previous: Option<&Proposal>,
    ) -> Result<Proposal, AgentError> {
        let expansion = self
            .judge
            .propose_expansion(query, rationale, previous.map(|p| p.expansion.as_str()))
            .await
            .map_err(|e| AgentError::Proposal(e.to_string()))?;
        let expansion = expansion.trim().to_string();
        if expansion.is_empty() {
            return Err(AgentError::Proposal("empty expansion".to_string()));
        }

        let keywords = match self.judge.derive_keywords(&expansion).await {
            Ok(kws) => kws
                .iter()
                .map(|k| normalize_trigger(k))
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Keyword derivation failed; using query slug");
                Vec::new()
            }
        };
        let keywords = if keywords.is_empty() {
            let slug = fallback_trigger(query);
            if slug.is_empty() {
                return Err(AgentError::Proposal(format!(
                    "no trigger keyword derivable for '{}'",
                    query
                )));
            }
            vec![slug]
        } else {
            keywords
        };

        let mut triggers: Vec<String> = Vec::new();
        for keyword in keywords {
            let trigger = self.unique_trigger(&keyword, &expansion, &triggers).await;
            if !triggers.contains(&trigger) {
                triggers.push(trigger);
            }
        }

        tracing::info!(
            query = %query,
            triggers = ?triggers,
            expansion = %expansion,
            "Strategy proposed"
        );
        Ok(Proposal { expansion, triggers })
    }

    fn is_taken(&self, trigger: &str, chosen: &[String]) -> bool {
        trigger.is_empty() || self.store.contains(trigger) || chosen.iter().any(|c| c == trigger)
    }

    async fn unique_trigger(&self, keyword: &str, expansion: &str, chosen: &[String]) -> String {
        if !self.is_taken(keyword, chosen) {
            return keyword.to_string();
        }

        tracing::warn!(keyword = %keyword, "Trigger already in use; disambiguating");
        match self.judge.disambiguate_keyword(keyword, expansion).await {
            Ok(variant) => {
                let variant = normalize_trigger(&variant);
                if !self.is_taken(&variant, chosen) {
                    return variant;
                }
            }
            Err(e) => tracing::warn!(keyword = %keyword, error = %e, "Keyword disambiguation failed"),
        }

        if let Some(word) = self.first_significant_word(expansion, keyword) {
            let candidate = format!("{}_{}", keyword, word);
            if !self.is_taken(&candidate, chosen) {
                return candidate;
            }
        }

        (2..)
            .map(|n| format!("{}_{}", keyword, n))
            .find(|c| !self.is_taken(c, chosen))
            .unwrap_or_else(|| keyword.to_string())
    }

    fn first_significant_word(&self, expansion: &str, keyword: &str) -> Option<String> {
        expansion
            .unicode_words()
            .map(str::to_lowercase)
            .find(|w| {
                w.chars().count() > 2
                    && w != keyword
                    && !self.stopwords.contains(w)
                    && !w.chars().all(char::is_numeric)
            })
    }
}

/// Deterministic trigger from the query's first clause
///
/// Numbering is stripped and words are kept in order, so the trigger
/// matches the query it came from.
pub fn fallback_trigger(query: &str) -> String {
    let clause = query.split(':').next().unwrap_or_default();
    let clause = LEADING_NUMBER.replace(clause, "");
    clause
        .unicode_words()
        .take(FALLBACK_WORDS)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
