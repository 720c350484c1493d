//! Refinement engine scenarios over scripted collaborators

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{scripted_fixture, Fixture, TableJudge};
use tempfile::TempDir;
use verso_agent::refinement::RefinementMode;
use verso_agent::{CancellationToken, SectionResult};
use verso_config::{RefinementConfig, StrategyConfig};
use verso_core::{ErrorKind, ItemOrigin, SeenIdSet};
use verso_rag::{StrategyPersistence, StrategyStore, YamlStrategyFile};

const QUERY: &str = "Hope: endurance";

async fn run(fx: &Fixture, k: usize) -> (SectionResult, SeenIdSet) {
    let mut seen = SeenIdSet::new();
    let retrieved = fx.retriever.retrieve(QUERY, "Hope", k, &mut seen).await;
    assert_eq!(retrieved.items.len(), k, "fixture must fill the section");
    let result = fx
        .engine
        .refine(QUERY, "Hope", retrieved.items, &mut seen, &CancellationToken::new())
        .await;
    (result, seen)
}

fn ids(result: &SectionResult) -> Vec<&str> {
    result.items.iter().map(|i| i.id.as_str()).collect()
}

#[tokio::test]
async fn test_refinement_search_replaces_only_when_strictly_better() {
    let judge = TableJudge::new(
        &[
            ("p1", 9.0),
            ("p2", 9.0),
            ("p3", 8.0),
            ("p4", 2.0),
            ("p5", 3.0),
            ("p7", 10.0),
            ("p8", 9.0),
        ],
        1.0,
    );
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, _) = run(&fx, 5).await;

    assert_eq!(result.stats.mode, Some(RefinementMode::RefinementSearch));
    assert_eq!(result.stats.initial_average, Some(6.2));
    assert_eq!(result.stats.refinement_replacements, 2);
    assert_eq!(ids(&result), vec!["p7", "p1", "p2", "p8", "p3"]);
    assert_eq!(result.average, Some(9.0));
    assert!(result.flags.is_empty());

    let refined: Vec<_> = result
        .items
        .iter()
        .filter(|i| i.origin == ItemOrigin::Refinement)
        .collect();
    assert_eq!(refined.len(), 2);
}

#[tokio::test]
async fn test_pursuit_stops_when_candidates_run_out() {
    let judge = TableJudge::new(
        &[("p1", 9.0), ("p2", 9.0), ("p3", 8.0), ("p4", 2.0), ("p5", 3.0)],
        1.0,
    );
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, seen) = run(&fx, 5).await;

    // Nothing better existed; the section is left as retrieved
    assert_eq!(result.stats.refinement_replacements, 0);
    assert_eq!(result.stats.pursuit_rounds, 1);
    assert_eq!(result.average, Some(6.2));
    assert_eq!(ids(&result), vec!["p1", "p2", "p3", "p5", "p4"]);
    // Running out of candidates is convergence, not a failure
    assert!(result.flags.is_empty());
    assert_eq!(seen.len(), 12);

    let searches = fx.index.searches.lock();
    assert!(searches.last().unwrap().is_empty());
}

#[tokio::test]
async fn test_small_core_selects_strategy_proposal() {
    let judge = TableJudge::new(&[("p1", 9.0), ("p2", 8.0), ("p3", 2.0), ("p4", 2.0)], 9.0);
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, _) = run(&fx, 4).await;

    assert_eq!(result.stats.mode, Some(RefinementMode::StrategyProposal));
    // Two core items never reach a centroid search
    assert_eq!(fx.index.vector_calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.stats.proposal_rounds, 1);

    let got: HashSet<_> = ids(&result).into_iter().collect();
    assert_eq!(got, HashSet::from(["p1", "p2", "p5", "p6"]));
    assert_eq!(result.average, Some(8.75));

    // Session overlay only; learning is off
    assert!(result.stats.learned_triggers.is_empty());
    assert_eq!(fx.store.session_triggers(), vec!["toivo"]);
}

#[tokio::test]
async fn test_confirmed_improvement_is_persisted() {
    let dir = TempDir::new().unwrap();
    let file = Arc::new(YamlStrategyFile::new(dir.path().join("strategies.yaml")));
    let store = StrategyStore::open(file.clone()).unwrap();

    let judge = TableJudge::new(&[("p1", 9.0), ("p2", 8.0), ("p3", 2.0), ("p4", 2.0)], 9.0);
    let strategy = StrategyConfig {
        learning_enabled: true,
        ..Default::default()
    };
    let fx = scripted_fixture(12, judge, store, RefinementConfig::default(), strategy);

    let (result, _) = run(&fx, 4).await;

    assert_eq!(result.stats.learned_triggers, vec!["toivo"]);
    let stored = file.load().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].trigger, "toivo");
    assert_eq!(stored[0].expansion_text, "Endurance that grows through trials");
}

#[tokio::test]
async fn test_unimproved_proposals_stay_in_session() {
    let dir = TempDir::new().unwrap();
    let file = Arc::new(YamlStrategyFile::new(dir.path().join("strategies.yaml")));
    let store = StrategyStore::open(file.clone()).unwrap();

    let judge = TableJudge::new(&[("p1", 9.0), ("p2", 8.0), ("p3", 2.0), ("p4", 2.0)], 1.0);
    let strategy = StrategyConfig {
        learning_enabled: true,
        ..Default::default()
    };
    let fx = scripted_fixture(20, judge, store, RefinementConfig::default(), strategy);

    let (result, _) = run(&fx, 4).await;

    assert_eq!(result.stats.proposal_rounds, 3);
    assert!(result.stats.learned_triggers.is_empty());
    assert!(file.load().unwrap().is_empty());

    // Each round learned a distinct trigger; none overwrote the first
    let session = fx.store.session_triggers();
    assert_eq!(session.len(), 3);
    assert_eq!(session[0], "toivo");
    assert_eq!(session[1], "toivo_variant");
    assert_eq!(
        fx.store.get("toivo").unwrap().expansion_text,
        "Endurance that grows through trials"
    );
}

#[tokio::test]
async fn test_aggressive_pursuit_terminates_and_never_resurfaces_ids() {
    let mut table: Vec<(String, f32)> = vec![
        ("p1".into(), 9.0),
        ("p2".into(), 8.0),
        ("p3".into(), 3.0),
        ("p4".into(), 3.0),
        ("p5".into(), 3.0),
    ];
    table.extend((6..=40).map(|i| (format!("p{}", i), 4.0)));
    let table_ref: Vec<(&str, f32)> = table.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let refinement = RefinementConfig {
        force_aggressive: true,
        aggressive_round_cap: None,
        quality_target: 10.0,
        ..Default::default()
    };
    let fx = scripted_fixture(
        40,
        TableJudge::new(&table_ref, 1.0),
        StrategyStore::new(),
        refinement,
        StrategyConfig::default(),
    );

    let (result, _) = tokio::time::timeout(Duration::from_secs(10), run(&fx, 5))
        .await
        .expect("aggressive pursuit must terminate");

    assert_eq!(result.stats.mode, Some(RefinementMode::Aggressive));
    assert_eq!(result.stats.proposal_rounds, 0);
    assert!(result.stats.pursuit_rounds >= 1);
    assert_eq!(result.average, Some(5.8));

    // Candidate pools after the initial retrieval are pairwise disjoint
    let searches = fx.index.searches.lock();
    let mut surfaced: HashSet<String> = ["p1", "p2", "p3", "p4", "p5"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for pool in searches.iter().skip(1) {
        for id in pool {
            assert!(surfaced.insert(id.clone()), "{} offered twice", id);
        }
    }
}

#[tokio::test]
async fn test_judge_failure_leaves_section_unscored() {
    let fx = scripted_fixture(
        12,
        TableJudge::failing(),
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, _) = run(&fx, 5).await;

    assert_eq!(result.average, None);
    assert!(result.has_flag(ErrorKind::JudgeUnparseable));
    assert_eq!(result.items.len(), 5);
    assert_eq!(fx.judge.score_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_token_stops_between_rounds() {
    let judge = TableJudge::new(
        &[("p1", 9.0), ("p2", 9.0), ("p3", 8.0), ("p4", 2.0), ("p5", 3.0)],
        1.0,
    );
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut seen = SeenIdSet::new();
    let retrieved = fx.retriever.retrieve(QUERY, "Hope", 5, &mut seen).await;
    let result = fx
        .engine
        .refine(QUERY, "Hope", retrieved.items, &mut seen, &cancel)
        .await;

    // The single refinement search still runs; pursuit does not
    assert_eq!(result.stats.pursuit_rounds, 0);
    assert!(result.flags.iter().any(|f| f.detail == "cancelled"));
    assert_eq!(result.average, Some(6.2));
}

#[tokio::test]
async fn test_failed_proposal_keeps_weak_items_and_flags() {
    // Replacements score 1, so the pursuit that follows cannot improve either
    let judge = TableJudge::new(
        &[("p1", 9.0), ("p2", 8.0), ("p3", 2.0), ("p4", 2.0)],
        1.0,
    )
    .failing_proposals();
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, _) = run(&fx, 4).await;

    assert_eq!(result.stats.mode, Some(RefinementMode::StrategyProposal));
    assert!(result.has_flag(ErrorKind::StrategyProposalFailed));
    assert_eq!(result.stats.proposal_rounds, 0);
    assert_eq!(ids(&result), vec!["p1", "p2", "p3", "p4"]);
    assert_eq!(result.average, Some(5.25));
    assert!(fx.store.session_triggers().is_empty());
}

#[tokio::test]
async fn test_partially_scored_section_is_flagged() {
    let judge = TableJudge::new(
        &[("p1", 9.0), ("p2", 9.0), ("p3", 9.0), ("p4", 8.0)],
        9.0,
    )
    .unscorable(&["p5"]);
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, _) = run(&fx, 5).await;

    assert_eq!(result.stats.mode, Some(RefinementMode::Satisfied));
    assert_eq!(result.average, Some(8.75));
    assert_eq!(result.flags.len(), 1);
    assert!(result.has_flag(ErrorKind::JudgeUnparseable));

    let last = result.items.last().unwrap();
    assert_eq!(last.id, "p5");
    assert_eq!(last.score, None);
}

#[tokio::test]
async fn test_refinement_search_reverts_when_the_mean_drops() {
    // p4 is unscored; the only candidates score 1
    let judge = TableJudge::new(
        &[("p1", 9.0), ("p2", 9.0), ("p3", 9.0), ("p5", 3.0)],
        1.0,
    )
    .unscorable(&["p4"]);
    let fx = scripted_fixture(
        12,
        judge,
        StrategyStore::new(),
        RefinementConfig::default(),
        StrategyConfig::default(),
    );

    let (result, _) = run(&fx, 5).await;

    assert_eq!(result.stats.mode, Some(RefinementMode::RefinementSearch));
    assert_eq!(result.stats.initial_average, Some(7.5));
    assert_eq!(result.stats.refinement_replacements, 0);
    assert_eq!(result.average, Some(7.5));
    assert_eq!(ids(&result), vec!["p1", "p2", "p3", "p5", "p4"]);
    assert!(result
        .items
        .iter()
        .all(|i| i.origin != ItemOrigin::Refinement));
}
