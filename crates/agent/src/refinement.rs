//! Refinement engine
//!
//! Raises a section's judged quality by replacing weak items. Every round
//! recomputes a dynamic threshold (the mean of the current valid scores)
//! and splits items into core (at or above) and weak (below, worst first).
//!
//! Modes:
//! - Refinement search: centroid of the core vectors, one nearest-neighbor
//!   round, strictly-better one-for-one replacement
//! - Strategy proposal: when the core is too small, learn an expansion
//!   strategy and re-retrieve the weak slots
//! - Quality pursuit: repeated refinement searches sized to close the gap
//!   to the target, until the target is met or progress stops
//!
//! Mandatory items are never weak and never replaced.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use verso_config::{RefinementConfig, StrategyConfig};
use verso_core::{
    CandidateSet, EmbeddingIndex, Error, ErrorKind, Item, ItemOrigin, Judge, PassageLookup,
    QualityVerdict, SeenIdSet, MAX_SCORE, MIN_SCORE,
};
use verso_rag::HybridRetriever;

use crate::proposer::{Proposal, StrategyProposer};

/// Mean of all valid item scores; the dynamic threshold
pub fn threshold(items: &[Item]) -> Option<f32> {
    average(items)
}

/// Mean of all valid item scores
pub fn average(items: &[Item]) -> Option<f32> {
    let scores: Vec<f32> = items.iter().filter_map(Item::valid_score).collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f32>() / scores.len() as f32)
    }
}

/// Split item indices into core and weak
///
/// Core: valid score at or above `threshold`. Weak: non-mandatory items
/// below it or unscored, ordered worst first (unscored before scored).
pub fn partition(items: &[Item], threshold: f32) -> (Vec<usize>, Vec<usize>) {
    let mut core = Vec::new();
    let mut weak = Vec::new();

    for (i, item) in items.iter().enumerate() {
        match item.valid_score() {
            Some(s) if s >= threshold => core.push(i),
            _ if item.is_mandatory() => {}
            _ => weak.push(i),
        }
    }

    weak.sort_by(|a, b| sort_score(&items[*a]).total_cmp(&sort_score(&items[*b])));
    (core, weak)
}

fn sort_score(item: &Item) -> f32 {
    item.valid_score().unwrap_or(f32::NEG_INFINITY)
}

/// Weak items (worst first) that must be replaced to cover `needed` points
///
/// Each replacement can gain at most `MAX_SCORE - score`. Always at least 1.
fn replacements_needed(items: &[Item], weak: &[usize], needed: f32) -> usize {
    let mut gain = 0.0f32;
    let mut count = 0usize;
    for &w in weak {
        if gain >= needed {
            break;
        }
        gain += MAX_SCORE - items[w].valid_score().unwrap_or(MIN_SCORE);
        count += 1;
    }
    count.max(1)
}

/// Refinement mode chosen after the initial score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementMode {
    /// Target already met; nothing to refine
    Satisfied,
    RefinementSearch,
    StrategyProposal,
    /// Strategy proposal skipped, straight to quality pursuit
    Aggressive,
}

/// A non-fatal problem recorded for a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFlag {
    pub kind: ErrorKind,
    pub detail: String,
}

impl SectionFlag {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Per-section refinement counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementStats {
    pub mode: Option<RefinementMode>,
    pub initial_average: Option<f32>,
    pub refinement_replacements: usize,
    pub proposal_rounds: usize,
    pub pursuit_rounds: usize,
    pub pursuit_replacements: usize,
    /// Triggers written to durable storage
    pub learned_triggers: Vec<String>,
}

/// Final state of one section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    /// Items, best first; unscored items last
    pub items: Vec<Item>,
    /// Mean item score, `None` if nothing could be judged
    pub average: Option<f32>,
    pub flags: Vec<SectionFlag>,
    pub stats: RefinementStats,
}

impl SectionResult {
    pub fn has_flag(&self, kind: ErrorKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }
}

/// Refinement engine
pub struct RefinementEngine {
    judge: Arc<dyn Judge>,
    index: Arc<dyn EmbeddingIndex>,
    lookup: Arc<dyn PassageLookup>,
    retriever: Arc<HybridRetriever>,
    proposer: StrategyProposer,
    config: RefinementConfig,
    learning_enabled: bool,
    max_proposal_attempts: usize,
    search_timeout: Duration,
}

impl RefinementEngine {
    pub fn new(
        judge: Arc<dyn Judge>,
        index: Arc<dyn EmbeddingIndex>,
        retriever: Arc<HybridRetriever>,
        config: RefinementConfig,
        strategy: &StrategyConfig,
    ) -> Self {
        let proposer = StrategyProposer::new(judge.clone(), retriever.strategies().clone());
        Self {
            lookup: retriever.lookup().clone(),
            judge,
            index,
            retriever,
            proposer,
            config,
            learning_enabled: strategy.learning_enabled,
            max_proposal_attempts: strategy.max_proposal_attempts,
            search_timeout: Duration::from_secs(
                verso_config::constants::timeouts::RETRIEVAL_SECS,
            ),
        }
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_proposer(mut self, proposer: StrategyProposer) -> Self {
        self.proposer = proposer;
        self
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// Score and refine one section's retrieved items
    ///
    /// `seen` must already hold every id the retriever surfaced. Never
    /// fails: problems are recorded as flags on the result.
    pub async fn refine(
        &self,
        query: &str,
        title: &str,
        candidates: CandidateSet,
        seen: &mut SeenIdSet,
        cancel: &CancellationToken,
    ) -> SectionResult {
        let mut result = SectionResult::default();
        let mut items = candidates.into_vec();

        if items.is_empty() {
            return result;
        }

        let rationale = match self.score(query, &mut items, &mut result).await {
            Ok(v) => v.overall_rationale,
            Err(e) => {
                tracing::error!(query = %query, error = %e, "Initial scoring failed");
                result.flags.push(SectionFlag::from_error(&e));
                result.items = items;
                return result;
            }
        };

        let Some(initial) = average(&items) else {
            result.flags.push(SectionFlag::new(
                ErrorKind::JudgeUnparseable,
                "judge scored none of the items",
            ));
            result.items = items;
            return result;
        };
        result.stats.initial_average = Some(initial);

        let target = self.config.quality_target;
        let mode = if initial >= target {
            RefinementMode::Satisfied
        } else if self.config.force_aggressive {
            RefinementMode::Aggressive
        } else {
            let (core, _) = partition(&items, initial);
            if core.len() >= self.config.core_minimum {
                RefinementMode::RefinementSearch
            } else {
                RefinementMode::StrategyProposal
            }
        };
        result.stats.mode = Some(mode);

        tracing::info!(
            query = %query,
            average = initial,
            items = items.len(),
            mode = ?mode,
            "Initial score"
        );

        match mode {
            RefinementMode::Satisfied => {}
            RefinementMode::RefinementSearch => {
                self.refinement_search(query, &mut items, seen, &mut result)
                    .await;
            }
            RefinementMode::StrategyProposal => {
                self.strategy_proposal(query, title, &mut items, seen, rationale, cancel, &mut result)
                    .await;
            }
            RefinementMode::Aggressive => {}
        }

        if mode != RefinementMode::Satisfied {
            self.quality_pursuit(query, &mut items, seen, cancel, &mut result)
                .await;
        }

        items.sort_by(|a, b| sort_score(b).total_cmp(&sort_score(a)));
        result.average = average(&items);
        result.items = items;

        tracing::info!(
            query = %query,
            initial = initial,
            average = ?result.average,
            flags = result.flags.len(),
            "Section refined"
        );
        result
    }

    /// Judge `items` and attach the scores
    ///
    /// A verdict with failed batches still applies; the section is flagged
    /// once because its unscored items are judged on nothing.
    async fn score(
        &self,
        query: &str,
        items: &mut [Item],
        result: &mut SectionResult,
    ) -> Result<QualityVerdict, Error> {
        let verdict = self.judge.score_items(query, items).await?;
        let applied = verdict.apply_to(items);
        tracing::debug!(query = %query, scored = applied, of = items.len(), "Items scored");

        if verdict.is_partial() {
            tracing::warn!(
                query = %query,
                failed_batches = verdict.failed_batches,
                unscored = items.len() - applied,
                "Judge scored only part of the items"
            );
            if !result.has_flag(ErrorKind::JudgeUnparseable) {
                result.flags.push(SectionFlag::new(
                    ErrorKind::JudgeUnparseable,
                    format!(
                        "judge failed {} batch(es); {} of {} items unscored",
                        verdict.failed_batches,
                        items.len() - applied,
                        items.len()
                    ),
                ));
            }
        }
        Ok(verdict)
    }

    /// Single refinement-search round
    async fn refinement_search(
        &self,
        query: &str,
        items: &mut [Item],
        seen: &mut SeenIdSet,
        result: &mut SectionResult,
    ) {
        let Some(thr) = threshold(items) else { return };
        let (_, weak) = partition(items, thr);
        if weak.is_empty() {
            return;
        }
        let snapshot = items.to_vec();

        let need = weak
            .len()
            .max(self.config.min_refinement_batch)
            .min(self.config.max_refinement_batch);

        match self.replace_from_search(query, items, seen, need, result).await {
            Ok(replaced) => {
                // Filling an unscored slot can still pull the mean down
                let after = average(items).unwrap_or(thr);
                if after < thr {
                    tracing::info!(query = %query, threshold = thr, after, "Refinement search reverted");
                    items.clone_from_slice(&snapshot);
                    return;
                }
                result.stats.refinement_replacements = replaced;
                tracing::info!(query = %query, threshold = thr, replaced, "Refinement search done");
            }
            Err(e) => self.record_stop(query, &e, result),
        }
    }

    /// Learn a strategy and re-retrieve the weak slots
    #[allow(clippy::too_many_arguments)]
    async fn strategy_proposal(
        &self,
        query: &str,
        title: &str,
        items: &mut [Item],
        seen: &mut SeenIdSet,
        mut rationale: String,
        cancel: &CancellationToken,
        result: &mut SectionResult,
    ) {
        let mut previous: Option<Proposal> = None;

        for attempt in 1..=self.max_proposal_attempts {
            // Flagged by the pursuit loop that follows
            if cancel.is_cancelled() {
                return;
            }

            let Some(before) = average(items) else { return };
            if before >= self.config.quality_target {
                return;
            }
            let (_, weak) = partition(items, before);
            if weak.is_empty() {
                return;
            }

            let proposal = match self.proposer.propose(query, &rationale, previous.as_ref()).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(query = %query, attempt, error = %e, "Strategy proposal failed");
                    let err: Error = e.into();
                    result.flags.push(SectionFlag::from_error(&err));
                    return;
                }
            };

            let store = self.retriever.strategies();
            for strategy in proposal.strategies() {
                store.add_session(strategy);
            }

            let outcome = self
                .retriever
                .retrieve_replacements(query, title, weak.len(), seen)
                .await;
            if let Some(failure) = outcome.failure {
                result
                    .flags
                    .push(SectionFlag::new(ErrorKind::RetrievalUnavailable, failure));
                return;
            }
            if outcome.items.is_empty() {
                tracing::info!(query = %query, attempt, "No new candidates for the proposed strategy");
                return;
            }

            let mut fresh = outcome.items.into_vec();
            match self.score(query, &mut fresh, result).await {
                Ok(v) => rationale = v.overall_rationale,
                Err(e) => {
                    tracing::error!(query = %query, error = %e, "Scoring re-retrieved items failed");
                    result.flags.push(SectionFlag::from_error(&e));
                    return;
                }
            }

            for (slot, item) in weak.iter().zip(fresh) {
                items[*slot] = item;
            }
            result.stats.proposal_rounds += 1;

            let after = average(items).unwrap_or(before);
            tracing::info!(
                query = %query,
                attempt,
                before,
                after,
                triggers = ?proposal.triggers,
                "Strategy round done"
            );

            if after > before && self.learning_enabled {
                for trigger in &proposal.triggers {
                    match store.persist(trigger) {
                        Ok(true) => result.stats.learned_triggers.push(trigger.clone()),
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(trigger = %trigger, error = %e, "Failed to persist strategy");
                            let err: Error = e.into();
                            result.flags.push(SectionFlag::from_error(&err));
                        }
                    }
                }
            }

            previous = Some(proposal);
        }
    }

    /// Repeated refinement searches until the target is met or progress stops
    async fn quality_pursuit(
        &self,
        query: &str,
        items: &mut Vec<Item>,
        seen: &mut SeenIdSet,
        cancel: &CancellationToken,
        result: &mut SectionResult,
    ) {
        let target = self.config.quality_target;
        let cap = self.config.round_cap();
        let mut round = 0usize;

        loop {
            if cap.is_some_and(|c| round >= c) {
                tracing::debug!(query = %query, round, "Round cap reached");
                break;
            }
            if cancel.is_cancelled() {
                result.flags.push(SectionFlag::new(ErrorKind::Other, "cancelled"));
                break;
            }

            let Some(before) = average(items) else { break };
            if before >= target {
                break;
            }
            let (_, weak) = partition(items, before);
            if weak.is_empty() {
                break;
            }

            let scored: Vec<f32> = items.iter().filter_map(Item::valid_score).collect();
            let needed = target * scored.len() as f32 - scored.iter().sum::<f32>();
            let count = replacements_needed(items, &weak, needed);
            let buffer = self
                .config
                .min_buffer
                .max(count / self.config.buffer_divisor.max(1));
            let request = count + buffer;

            round += 1;
            result.stats.pursuit_rounds = round;
            let snapshot = items.clone();

            match self.replace_from_search(query, items, seen, request, result).await {
                Ok(replaced) => {
                    let after = average(items).unwrap_or(before);
                    tracing::info!(
                        query = %query,
                        round,
                        threshold = before,
                        request,
                        replaced,
                        after,
                        "Quality pursuit round"
                    );
                    if after <= before {
                        *items = snapshot;
                        break;
                    }
                    result.stats.pursuit_replacements += replaced;
                }
                Err(e) => {
                    self.record_stop(query, &e, result);
                    break;
                }
            }
        }
    }

    /// Search around the core centroid and replace weak items strictly better
    ///
    /// Candidate ids enter `seen` before they are scored.
    async fn replace_from_search(
        &self,
        query: &str,
        items: &mut [Item],
        seen: &mut SeenIdSet,
        request: usize,
        result: &mut SectionResult,
    ) -> Result<usize, Error> {
        let thr = threshold(items).ok_or(Error::NoNewCandidates)?;
        let (core, weak) = partition(items, thr);

        let centroid = self.centroid(items, &core).await?;

        let neighbors = tokio::time::timeout(
            self.search_timeout,
            self.index.search_excluding(&centroid, request, seen),
        )
        .await
        .map_err(|_| Error::Timeout(self.search_timeout.as_millis() as u64))?
        .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;

        let mut candidates = Vec::new();
        for n in neighbors {
            if !seen.insert(n.id.clone()) {
                continue;
            }
            if let Some(text) = self.lookup.text(&n.id) {
                candidates.push(Item::new(n.id, text, ItemOrigin::Refinement));
            }
        }
        if candidates.is_empty() {
            return Err(Error::NoNewCandidates);
        }

        self.score(query, &mut candidates, result).await?;
        candidates.retain(|c| c.valid_score().is_some());
        candidates.sort_by(|a, b| sort_score(b).total_cmp(&sort_score(a)));

        let mut replaced = 0;
        for (slot, candidate) in weak.iter().zip(candidates) {
            if sort_score(&candidate) > sort_score(&items[*slot]) {
                tracing::debug!(
                    out = %items[*slot].id,
                    into = %candidate.id,
                    old = ?items[*slot].score,
                    new = ?candidate.score,
                    "Replaced weak item"
                );
                items[*slot] = candidate;
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    /// Normalized mean of the core items' stored vectors
    async fn centroid(&self, items: &[Item], core: &[usize]) -> Result<Vec<f32>, Error> {
        let ids: Vec<String> = core.iter().map(|i| items[*i].id.clone()).collect();
        let vectors = self.index.vectors(&ids).await?;
        let Some((_, first)) = vectors.first() else {
            return Err(Error::NoNewCandidates);
        };

        let mut centroid = vec![0.0f32; first.len()];
        let mut used = 0usize;
        for (_, v) in &vectors {
            if v.len() != centroid.len() {
                continue;
            }
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x;
            }
            used += 1;
        }
        for c in centroid.iter_mut() {
            *c /= used.max(1) as f32;
        }
        verso_rag::embeddings::normalize(&mut centroid);
        Ok(centroid)
    }

    fn record_stop(&self, query: &str, err: &Error, result: &mut SectionResult) {
        if err.kind() == ErrorKind::NoNewCandidates {
            tracing::info!(query = %query, "No new candidates; refinement converged");
        } else {
            tracing::warn!(query = %query, error = %err, "Refinement stopped");
            result.flags.push(SectionFlag::from_error(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: Option<f32>, mandatory: bool) -> Item {
        let origin = if mandatory {
            ItemOrigin::Mandatory
        } else {
            ItemOrigin::Retrieved
        };
        Item {
            score,
            ..Item::new(id, "", origin)
        }
    }

    #[test]
    fn test_threshold_ignores_invalid_scores() {
        let items = vec![
            scored("a", Some(8.0), false),
            scored("b", Some(4.0), false),
            scored("c", None, false),
            scored("d", Some(f32::NAN), false),
        ];
        assert_eq!(threshold(&items), Some(6.0));
        assert_eq!(threshold(&[]), None);
    }

    #[test]
    fn test_partition_worst_first_and_mandatory_exempt() {
        let items = vec![
            scored("a", Some(9.0), false),
            scored("b", Some(5.0), false),
            scored("m", Some(1.0), true),
            scored("c", Some(3.0), false),
            scored("u", None, false),
            scored("d", Some(7.0), false),
        ];
        let thr = threshold(&items).unwrap();
        let (core, weak) = partition(&items, thr);
        let ids = |v: &[usize]| v.iter().map(|i| items[*i].id.as_str()).collect::<Vec<_>>();
        // Mean of 9, 5, 1, 3, 7 is 5; the mandatory item counts toward it
        assert_eq!(thr, 5.0);
        assert_eq!(ids(&core), vec!["a", "b", "d"]);
        assert_eq!(ids(&weak), vec!["u", "c"]);
    }

    #[test]
    fn test_replacements_needed_is_greedy() {
        let items = vec![
            scored("a", Some(2.0), false),
            scored("b", Some(4.0), false),
            scored("c", Some(6.0), false),
        ];
        // Gains 8, 6, 4
        assert_eq!(replacements_needed(&items, &[0, 1, 2], 8.0), 1);
        assert_eq!(replacements_needed(&items, &[0, 1, 2], 9.0), 2);
        assert_eq!(replacements_needed(&items, &[0, 1, 2], 100.0), 3);
        assert_eq!(replacements_needed(&items, &[0, 1, 2], 0.0), 1);
    }

    #[test]
    fn test_section_flag_from_error() {
        let flag = SectionFlag::from_error(&Error::JudgeUnparseable("no json".into()));
        assert_eq!(flag.kind, ErrorKind::JudgeUnparseable);
        assert!(flag.detail.contains("no json"));
    }
}
