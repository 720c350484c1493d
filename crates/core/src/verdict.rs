//! Judge verdicts

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Item;

/// Score and rationale for a single item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    pub score: f32,
    #[serde(default)]
    pub rationale: String,
}

/// Judge output for one scoring call; superseded, never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub overall_score: f32,
    pub overall_rationale: String,
    pub item_scores: HashMap<String, ItemScore>,
    /// Batches no model could score; their items carry no score
    #[serde(default)]
    pub failed_batches: usize,
}

impl QualityVerdict {
    /// Some items went unscored because a batch failed outright
    pub fn is_partial(&self) -> bool {
        self.failed_batches > 0
    }

    pub fn score_for(&self, id: &str) -> Option<f32> {
        self.item_scores.get(id).map(|s| s.score)
    }

    /// Attach scores to matching items; returns how many were scored
    pub fn apply_to(&self, items: &mut [Item]) -> usize {
        let mut applied = 0;
        for item in items.iter_mut() {
            if let Some(s) = self.item_scores.get(&item.id) {
                item.score = Some(s.score);
                item.rationale = Some(s.rationale.clone());
                applied += 1;
            }
        }
        applied
    }

    /// Merge per-batch verdicts into one
    ///
    /// The overall score is the batch overall scores weighted by how many
    /// items each batch scored.
    pub fn merge(verdicts: Vec<QualityVerdict>) -> Option<QualityVerdict> {
        if verdicts.len() <= 1 {
            return verdicts.into_iter().next();
        }

        let mut item_scores = HashMap::new();
        let mut rationales = Vec::new();
        let mut weighted = 0.0f32;
        let mut weight = 0usize;
        let mut failed_batches = 0usize;

        for v in verdicts {
            failed_batches += v.failed_batches;
            let n = v.item_scores.len().max(1);
            weighted += v.overall_score * n as f32;
            weight += n;
            if !v.overall_rationale.is_empty() {
                rationales.push(v.overall_rationale);
            }
            item_scores.extend(v.item_scores);
        }

        Some(QualityVerdict {
            overall_score: weighted / weight as f32,
            overall_rationale: rationales.join(" "),
            item_scores,
            failed_batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ItemOrigin;

    fn verdict(overall: f32, scores: &[(&str, f32)]) -> QualityVerdict {
        QualityVerdict {
            overall_score: overall,
            overall_rationale: format!("overall {}", overall),
            item_scores: scores
                .iter()
                .map(|(id, s)| {
                    (
                        id.to_string(),
                        ItemScore {
                            score: *s,
                            rationale: String::new(),
                        },
                    )
                })
                .collect(),
            failed_batches: 0,
        }
    }

    #[test]
    fn test_apply_to_scores_only_known_items() {
        let v = verdict(6.0, &[("a", 8.0)]);
        let mut items = vec![
            Item::new("a", "", ItemOrigin::Retrieved),
            Item::new("b", "", ItemOrigin::Retrieved),
        ];
        assert_eq!(v.apply_to(&mut items), 1);
        assert_eq!(items[0].score, Some(8.0));
        assert_eq!(items[1].score, None);
    }

    #[test]
    fn test_merge_weights_by_batch_size() {
        let merged = QualityVerdict::merge(vec![
            verdict(8.0, &[("a", 8.0), ("b", 8.0), ("c", 8.0)]),
            verdict(4.0, &[("d", 4.0)]),
        ])
        .unwrap();

        assert!((merged.overall_score - 7.0).abs() < 1e-6);
        assert_eq!(merged.item_scores.len(), 4);
        assert!(merged.overall_rationale.contains("overall 4"));
    }

    #[test]
    fn test_merge_sums_failed_batches() {
        let mut partial = verdict(8.0, &[("a", 8.0)]);
        partial.failed_batches = 1;
        let merged = QualityVerdict::merge(vec![partial, verdict(6.0, &[("b", 6.0)])]).unwrap();
        assert_eq!(merged.failed_batches, 1);
        assert!(merged.is_partial());
        assert!(!verdict(6.0, &[]).is_partial());
    }

    #[test]
    fn test_merge_empty() {
        assert!(QualityVerdict::merge(Vec::new()).is_none());
    }
}
