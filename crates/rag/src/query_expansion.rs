//! Strategy-based query expansion
//!
//! The expanded query is only used for embedding and reranking; the literal
//! query is never replaced.

use verso_core::{Judge, PassageLookup, Strategy};

use crate::strategy_store::StrategyStore;

/// Outcome of strategy matching for one query
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    /// Text to embed and rerank against
    pub text: String,
    /// Trigger of the applied strategy, if any
    pub strategy: Option<String>,
}

impl ExpandedQuery {
    pub fn unchanged(query: &str) -> Self {
        Self {
            text: query.to_string(),
            strategy: None,
        }
    }
}

/// Splice a strategy into a query
///
/// With an anchor: `Topic: '<q>'. Theme: '<expansion>'. Key example <id>: '<text>'.`
/// Without: `<expansion>. Original topic: <q>`
pub fn super_query(query: &str, strategy: &Strategy, anchor_text: Option<&str>) -> String {
    match (&strategy.anchor_item_id, anchor_text) {
        (Some(anchor_id), Some(text)) => format!(
            "Topic: '{}'. Theme: '{}'. Key example {}: '{}'.",
            query, strategy.expansion_text, anchor_id, text
        ),
        _ => format!(
            "{}. Original topic: {}",
            strategy.expansion_text.trim_end_matches('.'),
            query
        ),
    }
}

/// Expand `query` with the first matching strategy the judge accepts
///
/// Only the first trigger hit is considered. A judge failure or a "no"
/// leaves the query unchanged.
pub async fn expand(
    query: &str,
    store: &StrategyStore,
    judge: &dyn Judge,
    lookup: &dyn PassageLookup,
) -> ExpandedQuery {
    let Some(strategy) = store.first_match(query) else {
        return ExpandedQuery::unchanged(query);
    };

    match judge.is_applicable(query, &strategy).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(trigger = %strategy.trigger, "Strategy matched but judged not applicable");
            return ExpandedQuery::unchanged(query);
        }
        Err(e) => {
            tracing::warn!(
                trigger = %strategy.trigger,
                query = %query,
                error = %e,
                "Strategy applicability check failed"
            );
            return ExpandedQuery::unchanged(query);
        }
    }

    let anchor_text = strategy
        .anchor_item_id
        .as_deref()
        .and_then(|id| lookup.text(id).map(str::to_string).or_else(|| resolve_anchor(id, lookup)));

    if strategy.anchor_item_id.is_some() && anchor_text.is_none() {
        tracing::warn!(
            trigger = %strategy.trigger,
            anchor = ?strategy.anchor_item_id,
            "Anchor passage not found; expanding without it"
        );
    }

    tracing::info!(trigger = %strategy.trigger, "Strategy applied");
    ExpandedQuery {
        text: super_query(query, &strategy, anchor_text.as_deref()),
        strategy: Some(strategy.trigger.clone()),
    }
}

/// Anchor ids may be ranges (`"Room. 12:4-5"`); join their verses
fn resolve_anchor(id: &str, lookup: &dyn PassageLookup) -> Option<String> {
    let citation = crate::reference::Citation::parse(id)?;
    let ids = lookup.resolve(&citation.book, citation.chapter, (citation.start, citation.end));
    let text = ids
        .iter()
        .filter_map(|id| lookup.text(id))
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}
