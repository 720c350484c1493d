//! Section runner
//!
//! Runs every section of a document in numeric order. Each section gets a
//! fresh `SeenIdSet` and runs in its own task, so a panic is confined to
//! that section and recorded as a flag. Cancellation is checked before a
//! section starts and between refinement rounds.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use verso_core::{ErrorKind, SeenIdSet};
use verso_rag::HybridRetriever;

use crate::document::{Document, Section};
use crate::refinement::{RefinementEngine, SectionFlag, SectionResult};

/// Outcome of one section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub number: String,
    pub heading: String,
    pub query: String,
    /// Trigger of the strategy applied at initial retrieval
    pub strategy: Option<String>,
    pub boost_terms: Vec<String>,
    /// Nothing was retrieved; the section was not refined
    pub skipped: bool,
    pub result: SectionResult,
    pub elapsed_ms: u64,
}

impl SectionOutcome {
    fn failed(section: &Section, skipped: bool, flag: SectionFlag, elapsed_ms: u64) -> Self {
        Self {
            number: section.number.clone(),
            heading: section.heading.clone(),
            query: section.query(),
            strategy: None,
            boost_terms: Vec::new(),
            skipped,
            result: SectionResult {
                flags: vec![flag],
                ..Default::default()
            },
            elapsed_ms,
        }
    }

    pub fn is_flagged(&self) -> bool {
        !self.result.flags.is_empty()
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub title: Option<String>,
    pub table_of_contents: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sections: Vec<SectionOutcome>,
    /// Sections skipped because retrieval yielded nothing
    pub skipped: usize,
    /// Refined sections that carry at least one flag
    pub flagged: usize,
    /// Mean of all non-null section averages
    pub mean_score: Option<f32>,
    /// Strategies added during this run, persisted or not
    pub session_strategies: Vec<String>,
    /// Stopped before every section was attempted
    pub cancelled: bool,
}

impl RunReport {
    fn summarize(&mut self) {
        self.skipped = self.sections.iter().filter(|s| s.skipped).count();
        self.flagged = self
            .sections
            .iter()
            .filter(|s| !s.skipped && s.is_flagged())
            .count();

        let scores: Vec<f32> = self
            .sections
            .iter()
            .filter_map(|s| s.result.average)
            .collect();
        self.mean_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f32>() / scores.len() as f32)
        };
    }
}

/// Runs document sections through retrieval and refinement
#[derive(Clone)]
pub struct SectionRunner {
    retriever: Arc<HybridRetriever>,
    engine: Arc<RefinementEngine>,
    items_per_section: usize,
    max_concurrent: usize,
}

impl SectionRunner {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        engine: Arc<RefinementEngine>,
        items_per_section: usize,
    ) -> Self {
        Self {
            retriever,
            engine,
            items_per_section,
            max_concurrent: 1,
        }
    }

    /// Sections in flight at once; results stay in section order
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    /// Run every section of `document`
    pub async fn run(&self, document: &Document, cancel: &CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = document.sections.len();

        tracing::info!(
            title = ?document.title,
            sections = total,
            concurrency = self.max_concurrent,
            "Run started"
        );

        let attempted: Vec<Option<SectionOutcome>> =
            stream::iter(document.sections.iter().cloned().enumerate())
                .map(|(i, section)| {
                    let runner = self.clone();
                    let cancel = cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(runner.spawn_section(i + 1, total, section, cancel).await)
                    }
                })
                .buffered(self.max_concurrent)
                .collect()
                .await;

        let cancelled = attempted.iter().any(Option::is_none);
        let sections: Vec<SectionOutcome> = attempted.into_iter().flatten().collect();

        let mut report = RunReport {
            title: document.title.clone(),
            table_of_contents: document.table_of_contents.clone(),
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            sections,
            skipped: 0,
            flagged: 0,
            mean_score: None,
            session_strategies: self.retriever.strategies().session_triggers(),
            cancelled,
        };
        report.summarize();

        tracing::info!(
            elapsed_ms = report.elapsed_ms,
            sections = report.sections.len(),
            skipped = report.skipped,
            flagged = report.flagged,
            mean_score = ?report.mean_score,
            cancelled = report.cancelled,
            "Run finished"
        );
        report
    }

    async fn spawn_section(
        self,
        position: usize,
        total: usize,
        section: Section,
        cancel: CancellationToken,
    ) -> SectionOutcome {
        let span = tracing::info_span!("section", number = %section.number, position, total);
        let start = Instant::now();
        let task_section = section.clone();
        let runner = self.clone();

        let handle = tokio::spawn(
            async move { runner.run_section(task_section, cancel).await }.instrument(span),
        );

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(section = %section.number, error = %e, "Section task failed");
                SectionOutcome::failed(
                    &section,
                    false,
                    SectionFlag::new(ErrorKind::Other, format!("section task failed: {}", e)),
                    start.elapsed().as_millis() as u64,
                )
            }
        }
    }

    async fn run_section(self, section: Section, cancel: CancellationToken) -> SectionOutcome {
        let start = Instant::now();
        let query = section.query();
        let mut seen = SeenIdSet::new();

        let retrieval = self
            .retriever
            .retrieve(&query, &section.heading, self.items_per_section, &mut seen)
            .await;

        if retrieval.items.is_empty() {
            let flag = match retrieval.failure {
                Some(reason) => SectionFlag::new(ErrorKind::RetrievalUnavailable, reason),
                None => SectionFlag::new(ErrorKind::NoNewCandidates, "no candidates retrieved"),
            };
            tracing::warn!(query = %query, reason = %flag.detail, "Section skipped");
            return SectionOutcome::failed(&section, true, flag, start.elapsed().as_millis() as u64);
        }

        let result = self
            .engine
            .refine(&query, &section.heading, retrieval.items, &mut seen, &cancel)
            .await;

        SectionOutcome {
            number: section.number,
            heading: section.heading,
            query,
            strategy: retrieval.strategy,
            boost_terms: retrieval.boost_terms.into_iter().collect(),
            skipped: false,
            result,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(number: &str, average: Option<f32>, skipped: bool, flags: usize) -> SectionOutcome {
        SectionOutcome {
            number: number.into(),
            heading: number.into(),
            query: number.into(),
            strategy: None,
            boost_terms: Vec::new(),
            skipped,
            result: SectionResult {
                average,
                flags: (0..flags)
                    .map(|_| SectionFlag::new(ErrorKind::JudgeUnparseable, "x"))
                    .collect(),
                ..Default::default()
            },
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_summary_counts_and_mean() {
        let mut report = RunReport {
            title: None,
            table_of_contents: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
            sections: vec![
                outcome("1", Some(8.0), false, 0),
                outcome("2", None, true, 1),
                outcome("3", None, false, 1),
                outcome("4", Some(6.0), false, 0),
            ],
            skipped: 0,
            flagged: 0,
            mean_score: None,
            session_strategies: Vec::new(),
            cancelled: false,
        };
        report.summarize();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.mean_score, Some(7.0));
    }

    #[test]
    fn test_report_json_shape() {
        let report = RunReport {
            title: Some("Study".into()),
            table_of_contents: None,
            started_at: Utc::now(),
            elapsed_ms: 12,
            sections: vec![outcome("1", None, true, 1)],
            skipped: 1,
            flagged: 0,
            mean_score: None,
            session_strategies: vec!["toivo".into()],
            cancelled: false,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["title"], "Study");
        assert_eq!(json["sections"][0]["skipped"], true);
        assert!(json["mean_score"].is_null());
        assert_eq!(json["session_strategies"][0], "toivo");

        let back: RunReport = serde_json::from_value(json).unwrap();
        assert_eq!(back.sections[0].number, "1");
    }
}
