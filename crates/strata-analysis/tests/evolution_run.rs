use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strata_analysis::{
    AnalysisError, AnalysisSettings, CancellationToken, EvolutionAnalyzer, EvolutionRunRequest,
    OracleStage, load_analysis,
};
use strata_core::{
    ArchitecturalLesson, ChangeStatus, Commit, CommitStats, DiffSnapshot, DiffSource,
    DiffSourceError, EvolutionAnalysisResult, FileChange, Impact, JourneyVerdict, NamedPiece, SNAPSHOT_SCHEMA_VERSION,
    SynthesisVerdict, TokenUsage, parse_timestamp,
};
use strata_infer::{
    InferError, JourneyOracle, JourneyRequest, LoadedOracle, SynthesisOracle, SynthesisRequest,
};
use strata_store::{
    CommitStore, EvolutionResultStore, MemoryStore, SnapshotCache, SqliteStore,
};
use tempfile::tempdir;

const REPO: &str = "acme/shop";

#[derive(Debug, Clone, Copy)]
enum JourneyFailure {
    ContextWindow,
    Invalid,
}

#[derive(Default)]
struct ScriptedOracle {
    hotspot_lessons: HashMap<String, Vec<String>>,
    journey_failures: HashMap<String, JourneyFailure>,
    delays_ms: HashMap<String, u64>,
    synthesis: Option<SynthesisVerdict>,
    synthesis_fails: bool,
    journey_calls: Mutex<Vec<JourneyRequest>>,
    synthesis_calls: Mutex<Vec<SynthesisRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedOracle {
    fn journey_calls(&self) -> Vec<JourneyRequest> {
        self.journey_calls.lock().expect("journey calls").clone()
    }

    fn synthesis_calls(&self) -> Vec<SynthesisRequest> {
        self.synthesis_calls.lock().expect("synthesis calls").clone()
    }
}

#[async_trait]
impl JourneyOracle for ScriptedOracle {
    async fn analyze_journey(&self, request: &JourneyRequest) -> Result<JourneyVerdict, InferError> {
        self.journey_calls
            .lock()
            .expect("journey calls")
            .push(request.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delays_ms.get(&request.file_path) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.journey_failures.get(&request.file_path) {
            Some(JourneyFailure::ContextWindow) => {
                return Err(InferError::ContextWindowExceeded(
                    "HTTP 400: maximum context length is 8192 tokens".to_owned(),
                ));
            }
            Some(JourneyFailure::Invalid) => {
                return Err(InferError::InvalidResponse("no JSON object".to_owned()));
            }
            None => {}
        }

        let lessons = self.hotspot_lessons.get(&request.file_path);
        Ok(JourneyVerdict {
            path: request.file_path.clone(),
            description: format!("{} journey", request.file_path),
            is_hotspot: lessons.is_some(),
            evolutionary_lessons: lessons.cloned().unwrap_or_default(),
            reinforcement: None,
            tokens: TokenUsage::new(10, 5),
        })
    }
}

#[async_trait]
impl SynthesisOracle for ScriptedOracle {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisVerdict, InferError> {
        self.synthesis_calls
            .lock()
            .expect("synthesis calls")
            .push(request.clone());

        if self.synthesis_fails {
            return Err(InferError::Http {
                status: 502,
                body: "bad gateway".to_owned(),
            });
        }

        Ok(self.synthesis.clone().unwrap_or_else(|| SynthesisVerdict {
            summary: format!("{} files reviewed", request.verdicts.len()),
            architectural_lessons: Vec::new(),
            named_pieces: Vec::new(),
            tokens: TokenUsage::new(100, 20),
        }))
    }
}

/// Echoes one diff per requested hash and records every batch.
#[derive(Default)]
struct CountingDiffSource {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    uppercase_keys: bool,
}

impl CountingDiffSource {
    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("diff calls").clone()
    }
}

impl DiffSource for CountingDiffSource {
    fn fetch_file_diffs(
        &self,
        _repo: &str,
        file_path: &str,
        hashes: &[String],
    ) -> Result<BTreeMap<String, String>, DiffSourceError> {
        self.calls
            .lock()
            .map_err(|err| DiffSourceError::Unavailable(err.to_string()))?
            .push((file_path.to_owned(), hashes.to_vec()));

        Ok(hashes
            .iter()
            .map(|hash| {
                let key = if self.uppercase_keys {
                    hash.to_ascii_uppercase()
                } else {
                    hash.clone()
                };
                (key, format!("+diff {hash} for {file_path}"))
            })
            .collect())
    }
}

fn commit(hash: &str, date: &str, author: &str, paths: &[&str]) -> Commit {
    let files: Vec<FileChange> = paths
        .iter()
        .map(|path| FileChange {
            path: (*path).to_owned(),
            additions: 2,
            deletions: 1,
            status: ChangeStatus::Modified,
        })
        .collect();
    Commit {
        hash: hash.to_owned(),
        author: author.to_owned(),
        author_email: None,
        date: parse_timestamp(date).expect("date"),
        message: format!("commit {hash}"),
        stats: CommitStats::from_files(&files),
        files,
        diff: None,
    }
}

/// Newest first, the way histories are stored. `cart.ts` changes three
/// times, `api.ts` twice, `readme.md` once.
fn shop_history() -> Vec<Commit> {
    vec![
        commit("c3", "2024-03-03", "carol", &["cart.ts", "api.ts"]),
        commit("b2", "2024-02-02", "bob", &["cart.ts"]),
        commit("a1", "2024-01-01", "alice", &["cart.ts", "api.ts", "readme.md"]),
    ]
}

fn analyzer_with(
    oracle: Arc<ScriptedOracle>,
    diff_source: Arc<CountingDiffSource>,
    settings: AnalysisSettings,
) -> EvolutionAnalyzer {
    let loaded = LoadedOracle {
        journey: oracle.clone(),
        synthesis: oracle,
        provider_name: "scripted".to_owned(),
        model_name: "test-model".to_owned(),
    };
    EvolutionAnalyzer::new_with_oracles(settings, loaded, diff_source).expect("analyzer")
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .replace_commits(REPO, &shop_history())
        .expect("seed commits");
    store
}

fn cart_only() -> EvolutionRunRequest {
    EvolutionRunRequest {
        selected_files: Some(vec!["cart.ts".to_owned()]),
        ..EvolutionRunRequest::new(REPO)
    }
}

fn cached_snapshot(hash: &str, date: &str, schema_tag: Option<u32>) -> DiffSnapshot {
    DiffSnapshot {
        file_path: "cart.ts".to_owned(),
        commit_hash: hash.to_owned(),
        message: format!("commit {hash}"),
        diff: format!("cached {hash}"),
        timestamp: parse_timestamp(date).expect("date"),
        schema_tag,
        model_id: None,
    }
}

fn seed_cart_snapshots(store: &MemoryStore, schema_tag: Option<u32>) {
    for (hash, date) in [("a1", "2024-01-01"), ("b2", "2024-02-02"), ("c3", "2024-03-03")] {
        store
            .put_snapshot(REPO, &cached_snapshot(hash, date, schema_tag))
            .expect("seed snapshot");
    }
}

fn seed_prior_result(store: &MemoryStore) -> EvolutionAnalysisResult {
    let prior = EvolutionAnalysisResult {
        summary: "Earlier full analysis".to_owned(),
        model_id: Some("earlier-model".to_owned()),
        ..EvolutionAnalysisResult::statistics_only(REPO, Vec::new())
    };
    store
        .put_evolution_result(REPO, &prior)
        .expect("seed prior result");
    prior
}

#[test]
fn empty_cache_fetches_once_and_narrates_oldest_first() {
    let store = seeded_store();
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle.clone(), diffs.clone(), AnalysisSettings::default());

    let result = analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run");

    let calls = diffs.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "cart.ts");
    assert_eq!(calls[0].1.len(), 3);
    assert_eq!(store.snapshot_count().expect("count"), 3);

    let journeys = oracle.journey_calls();
    assert_eq!(journeys.len(), 1);
    let messages: Vec<_> = journeys[0]
        .snapshots
        .iter()
        .map(|snapshot| snapshot.message.as_str())
        .collect();
    assert_eq!(messages, vec!["commit a1", "commit b2", "commit c3"]);
    assert_eq!(journeys[0].snapshots[0].diff, "+diff a1 for cart.ts");
    assert_eq!(journeys[0].model_id, "test-model");
    assert_eq!(
        journeys[0].context,
        "Active files in this repo: cart.ts, api.ts, readme.md"
    );

    let stored = store
        .get_snapshot(REPO, "cart.ts", "b2")
        .expect("get")
        .expect("snapshot stored");
    assert_eq!(stored.schema_tag, Some(SNAPSHOT_SCHEMA_VERSION));
    assert_eq!(stored.model_id.as_deref(), Some("test-model"));

    assert_eq!(result.foundations.len(), 1);
    assert_eq!(result.foundations[0].reinforcement, "Stable core logic");
    assert_eq!(result.tokens, TokenUsage::new(110, 25));
    assert_eq!(
        store.get_evolution_result(REPO).expect("get result"),
        Some(result)
    );
}

#[test]
fn current_schema_snapshots_are_served_from_cache() {
    let store = seeded_store();
    seed_cart_snapshots(&store, Some(SNAPSHOT_SCHEMA_VERSION));
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle.clone(), diffs.clone(), AnalysisSettings::default());

    analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run");

    assert!(diffs.calls().is_empty());
    let journeys = oracle.journey_calls();
    assert_eq!(journeys.len(), 1);
    let cached: Vec<_> = journeys[0]
        .snapshots
        .iter()
        .map(|snapshot| snapshot.diff.as_str())
        .collect();
    assert_eq!(cached, vec!["cached a1", "cached b2", "cached c3"]);
}

#[test]
fn tagless_and_forced_snapshots_are_refetched() {
    let store = seeded_store();
    seed_cart_snapshots(&store, None);
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle, diffs.clone(), AnalysisSettings::default());

    analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run with tagless cache");
    assert_eq!(diffs.calls().len(), 1);
    assert_eq!(diffs.calls()[0].1.len(), 3);

    analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run with refreshed cache");
    assert_eq!(diffs.calls().len(), 1, "refreshed snapshots are fresh");

    let forced = EvolutionRunRequest {
        force_refresh: true,
        ..cart_only()
    };
    analyzer
        .run(&store, &forced, &CancellationToken::new())
        .expect("forced run");
    assert_eq!(diffs.calls().len(), 2);
    assert_eq!(store.snapshot_count().expect("count"), 3);
}

#[test]
fn same_second_commits_keep_history_order_across_cache_and_fetch() {
    let store = MemoryStore::new();
    store
        .replace_commits(
            REPO,
            &[
                commit("c3", "2024-02-02T10:00:00Z", "carol", &["cart.ts"]),
                commit("b2", "2024-02-02T10:00:00Z", "bob", &["cart.ts"]),
                commit("a1", "2024-01-01", "alice", &["cart.ts"]),
            ],
        )
        .expect("seed commits");
    store
        .put_snapshot(
            REPO,
            &cached_snapshot("c3", "2024-02-02T10:00:00Z", Some(SNAPSHOT_SCHEMA_VERSION)),
        )
        .expect("seed snapshot");
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle.clone(), diffs.clone(), AnalysisSettings::default());

    analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run");

    assert_eq!(diffs.calls()[0].1, vec!["a1", "b2"]);
    let messages: Vec<_> = oracle.journey_calls()[0]
        .snapshots
        .iter()
        .map(|snapshot| snapshot.message.clone())
        .collect();
    assert_eq!(messages, vec!["commit a1", "commit b2", "commit c3"]);
}

#[test]
fn diff_keys_are_matched_regardless_of_hash_case() {
    let store = seeded_store();
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource {
        uppercase_keys: true,
        ..CountingDiffSource::default()
    });
    let analyzer = analyzer_with(oracle.clone(), diffs, AnalysisSettings::default());

    analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run");

    let journeys = oracle.journey_calls();
    assert!(
        journeys[0]
            .snapshots
            .iter()
            .all(|snapshot| snapshot.diff.starts_with("+diff "))
    );
}

#[test]
fn hotspot_verdicts_land_in_hotspots_only() {
    let store = seeded_store();
    let oracle = Arc::new(ScriptedOracle {
        hotspot_lessons: HashMap::from([(
            "cart.ts".to_owned(),
            vec!["Totals moved server side".to_owned(), "Coupons split out".to_owned()],
        )]),
        ..ScriptedOracle::default()
    });
    let analyzer = analyzer_with(
        oracle,
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    );

    let result = analyzer
        .run(&store, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
        .expect("run");

    assert_eq!(result.hotspots.len(), 1);
    assert_eq!(result.hotspots[0].path, "cart.ts");
    assert_eq!(
        result.hotspots[0].evolutionary_lessons,
        vec!["Totals moved server side", "Coupons split out"]
    );
    let foundation_paths: Vec<_> = result
        .foundations
        .iter()
        .map(|entry| entry.path.as_str())
        .collect();
    assert_eq!(foundation_paths, vec!["api.ts", "readme.md"]);
}

#[test]
fn missing_history_fails_before_any_oracle_call() {
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle.clone(), diffs.clone(), AnalysisSettings::default());

    let never_fetched = MemoryStore::new();
    let err = analyzer
        .run(&never_fetched, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
        .expect_err("never fetched");
    assert!(matches!(err, AnalysisError::NoHistory { ref repo } if repo == REPO));

    let empty = MemoryStore::new();
    empty.replace_commits(REPO, &[]).expect("replace");
    let err = analyzer
        .run(&empty, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
        .expect_err("empty history");
    assert!(matches!(err, AnalysisError::NoHistory { .. }));

    assert!(oracle.journey_calls().is_empty());
    assert!(oracle.synthesis_calls().is_empty());
    assert!(diffs.calls().is_empty());
}

#[test]
fn context_window_failure_names_file_and_persists_nothing() {
    let store = seeded_store();
    let prior = seed_prior_result(&store);
    let oracle = Arc::new(ScriptedOracle {
        journey_failures: HashMap::from([("api.ts".to_owned(), JourneyFailure::ContextWindow)]),
        ..ScriptedOracle::default()
    });
    let analyzer = analyzer_with(
        oracle.clone(),
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    );

    let err = analyzer
        .run(&store, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
        .expect_err("context window");

    match &err {
        AnalysisError::ContextWindowExceeded {
            stage, file_path, ..
        } => {
            assert_eq!(*stage, OracleStage::Journey);
            assert_eq!(file_path.as_deref(), Some("api.ts"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_oracle_error());
    assert!(err.to_string().contains("context window exceeded for api.ts"));
    assert!(oracle.synthesis_calls().is_empty());
    assert_eq!(store.get_evolution_result(REPO).expect("get"), Some(prior));
}

#[test]
fn generic_journey_and_synthesis_failures_are_oracle_errors() {
    let store = seeded_store();
    let failing_journey = Arc::new(ScriptedOracle {
        journey_failures: HashMap::from([("cart.ts".to_owned(), JourneyFailure::Invalid)]),
        ..ScriptedOracle::default()
    });
    let err = analyzer_with(
        failing_journey,
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    )
    .run(&store, &cart_only(), &CancellationToken::new())
    .expect_err("journey failure");
    assert!(matches!(
        err,
        AnalysisError::Oracle { stage: OracleStage::Journey, ref file_path, .. }
            if file_path.as_deref() == Some("cart.ts")
    ));

    let failing_synthesis = Arc::new(ScriptedOracle {
        synthesis_fails: true,
        ..ScriptedOracle::default()
    });
    let err = analyzer_with(
        failing_synthesis.clone(),
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    )
    .run(&store, &cart_only(), &CancellationToken::new())
    .expect_err("synthesis failure");
    assert!(matches!(
        err,
        AnalysisError::Oracle {
            stage: OracleStage::Synthesis,
            file_path: None,
            ..
        }
    ));
    assert_eq!(failing_synthesis.synthesis_calls().len(), 1);
    assert_eq!(store.get_evolution_result(REPO).expect("get"), None);
}

#[test]
fn cancelled_run_persists_nothing() {
    let store = seeded_store();
    let prior = seed_prior_result(&store);
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle.clone(), diffs.clone(), AnalysisSettings::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = analyzer
        .run(&store, &EvolutionRunRequest::new(REPO), &cancel)
        .expect_err("cancelled");

    assert!(matches!(err, AnalysisError::Cancelled));
    assert!(diffs.calls().is_empty());
    assert!(oracle.journey_calls().is_empty());
    assert_eq!(store.get_evolution_result(REPO).expect("get"), Some(prior));
}

#[test]
fn verdicts_follow_selection_order_under_bounded_concurrency() {
    let store = MemoryStore::new();
    let history: Vec<Commit> = (0..6)
        .map(|index| {
            let paths: Vec<String> = (0..=index).map(|file| format!("f{file}.ts")).collect();
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            commit(
                &format!("h{index}"),
                &format!("2024-01-0{}", index + 1),
                "alice",
                &paths,
            )
        })
        .collect();
    store.replace_commits(REPO, &history).expect("seed");

    let oracle = Arc::new(ScriptedOracle {
        delays_ms: HashMap::from([
            ("f0.ts".to_owned(), 80),
            ("f1.ts".to_owned(), 40),
            ("f2.ts".to_owned(), 10),
        ]),
        ..ScriptedOracle::default()
    });
    let analyzer = analyzer_with(
        oracle.clone(),
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    );

    let result = analyzer
        .run(&store, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
        .expect("run");

    let analysed: Vec<_> = result
        .foundations
        .iter()
        .map(|entry| entry.path.as_str())
        .collect();
    assert_eq!(analysed, vec!["f0.ts", "f1.ts", "f2.ts", "f3.ts", "f4.ts"]);
    assert_eq!(oracle.journey_calls().len(), 5);
    assert!(oracle.max_in_flight.load(Ordering::SeqCst) <= 2);

    let synthesis = oracle.synthesis_calls();
    let synthesized: Vec<_> = synthesis[0]
        .verdicts
        .iter()
        .map(|verdict| verdict.path.as_str())
        .collect();
    assert_eq!(synthesized, analysed);
}

#[test]
fn unknown_and_duplicate_selections_are_skipped() {
    let store = seeded_store();
    let oracle = Arc::new(ScriptedOracle::default());
    let analyzer = analyzer_with(
        oracle.clone(),
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    );

    let request = EvolutionRunRequest {
        selected_files: Some(vec![
            "readme.md".to_owned(),
            "ghost.ts".to_owned(),
            "readme.md".to_owned(),
        ]),
        ..EvolutionRunRequest::new(REPO)
    };
    let result = analyzer
        .run(&store, &request, &CancellationToken::new())
        .expect("run");

    assert_eq!(oracle.journey_calls().len(), 1);
    assert_eq!(result.foundations[0].path, "readme.md");
    assert_eq!(result.file_evolutions.len(), 3);
}

#[test]
fn selection_with_no_known_files_fails_and_keeps_stored_result() {
    let store = seeded_store();
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle.clone(), diffs.clone(), AnalysisSettings::default());

    let stored = analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("first run");

    let typo = EvolutionRunRequest {
        selected_files: Some(vec!["ghost.ts".to_owned()]),
        ..EvolutionRunRequest::new(REPO)
    };
    let err = analyzer
        .run(&store, &typo, &CancellationToken::new())
        .expect_err("nothing to analyse");

    match &err {
        AnalysisError::NoSelectedFiles { repo, unknown } => {
            assert_eq!(repo, REPO);
            assert_eq!(unknown, &vec!["ghost.ts".to_owned()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_oracle_error());
    assert!(err.to_string().contains("ghost.ts"));
    assert_eq!(oracle.journey_calls().len(), 1);
    assert_eq!(oracle.synthesis_calls().len(), 1);
    assert_eq!(diffs.calls().len(), 1);
    assert_eq!(store.get_evolution_result(REPO).expect("get"), Some(stored));
}

#[test]
fn synthesized_lessons_are_ranked_capped_and_model_override_applies() {
    let store = seeded_store();
    let lesson = |title: &str, impact: Impact| ArchitecturalLesson {
        title: title.to_owned(),
        lesson: format!("{title} lesson"),
        impact,
        affected_files: vec!["cart.ts".to_owned()],
    };
    let oracle = Arc::new(ScriptedOracle {
        synthesis: Some(SynthesisVerdict {
            summary: "Cart keeps absorbing pricing rules".to_owned(),
            architectural_lessons: vec![
                lesson("low", Impact::Low),
                lesson("medium", Impact::Medium),
                lesson("high-a", Impact::High),
                lesson("high-b", Impact::High),
            ],
            named_pieces: (0..3)
                .map(|index| NamedPiece {
                    name: format!("piece {index}"),
                    description: String::new(),
                    files: vec!["cart.ts".to_owned()],
                })
                .collect(),
            tokens: TokenUsage::new(1, 1),
        }),
        ..ScriptedOracle::default()
    });
    let settings = AnalysisSettings {
        max_lessons: 3,
        max_named_pieces: 2,
        ..AnalysisSettings::default()
    };
    let analyzer = analyzer_with(oracle.clone(), Arc::new(CountingDiffSource::default()), settings);

    let request = EvolutionRunRequest {
        model_id: Some("override/model".to_owned()),
        ..cart_only()
    };
    let result = analyzer
        .run(&store, &request, &CancellationToken::new())
        .expect("run");

    let titles: Vec<_> = result
        .architectural_lessons
        .iter()
        .map(|lesson| lesson.title.as_str())
        .collect();
    assert_eq!(titles, vec!["high-a", "high-b", "medium"]);
    assert_eq!(result.named_pieces.len(), 2);
    assert_eq!(result.summary, "Cart keeps absorbing pricing rules");
    assert_eq!(result.model_id.as_deref(), Some("override/model"));
    assert_eq!(oracle.synthesis_calls()[0].model_id, "override/model");
    assert!(result.generated_at.is_some());
}

#[test]
fn read_path_serves_statistics_then_stored_result_with_fresh_evolutions() {
    let store = seeded_store();
    let never_fetched = load_analysis(&store, "other/repo").expect("read unknown");
    assert!(!never_fetched.has_full_analysis);
    assert!(never_fetched.result.file_evolutions.is_empty());

    let before = load_analysis(&store, REPO).expect("read before run");
    assert!(!before.has_full_analysis);
    assert_eq!(before.result.file_evolutions.len(), 3);
    assert!(before.result.summary.is_empty());
    assert!(before.result.hotspots.is_empty());

    let analyzer = analyzer_with(
        Arc::new(ScriptedOracle::default()),
        Arc::new(CountingDiffSource::default()),
        AnalysisSettings::default(),
    );
    analyzer
        .run(&store, &cart_only(), &CancellationToken::new())
        .expect("run");

    let mut history = shop_history();
    history.insert(0, commit("d4", "2024-04-04", "dave", &["checkout.ts"]));
    store.replace_commits(REPO, &history).expect("new history");

    let after = analyzer.load_analysis(&store, REPO).expect("read after run");
    assert!(after.has_full_analysis);
    assert_eq!(after.result.summary, "1 files reviewed");
    assert_eq!(after.result.file_evolutions.len(), 4);
    assert!(
        after
            .result
            .file_evolutions
            .iter()
            .any(|evolution| evolution.path == "checkout.ts")
    );
}

#[test]
fn sqlite_store_round_trips_a_full_run() {
    let temp = tempdir().expect("tempdir");
    let oracle = Arc::new(ScriptedOracle::default());
    let diffs = Arc::new(CountingDiffSource::default());
    let analyzer = analyzer_with(oracle, diffs.clone(), AnalysisSettings::default());

    {
        let store = SqliteStore::open(temp.path()).expect("open store");
        store
            .replace_commits(REPO, &shop_history())
            .expect("seed commits");
        analyzer
            .run(&store, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
            .expect("run");
    }

    let reopened = SqliteStore::open(temp.path()).expect("reopen store");
    let view = load_analysis(&reopened, REPO).expect("read");
    assert!(view.has_full_analysis);
    assert_eq!(view.result.foundations.len(), 3);
    assert_eq!(
        reopened
            .list_snapshots(REPO, "cart.ts")
            .expect("list snapshots")
            .len(),
        3
    );

    analyzer
        .run(&reopened, &EvolutionRunRequest::new(REPO), &CancellationToken::new())
        .expect("second run");
    assert_eq!(diffs.calls().len(), 3, "second run is fully cached");
}
