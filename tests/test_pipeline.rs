use llm_latency_bench::persist::{build_items, clean_data};
use llm_latency_bench::runner::Measurement;
use llm_latency_bench::tracker::track;
use llm_latency_bench::{
    decode_lines, parse_scenario, publish_results, BenchmarkDocument, CallError, MetricKind,
    MetricsStore, PairOutcome, PersistConfig, RunSummary, Scenario, StreamDecodeError,
};
use std::time::{Duration, Instant};

fn chunk(text: &str) -> String {
    serde_json::json!({"choices": [{"text": text}]}).to_string()
}

/// Lines of a response body with their arrival offsets in milliseconds
fn body(t0: Instant, lines: &[(u64, String)]) -> Vec<(Instant, String)> {
    lines
        .iter()
        .map(|(ms, line)| (t0 + Duration::from_millis(*ms), line.clone()))
        .collect()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn test_stream_to_store() {
    let t0 = Instant::now();
    let lines = body(
        t0,
        &[
            (100, format!("data: {}", chunk("Hel"))),
            (100, String::new()),
            (150, ": keep-alive".to_string()),
            (300, format!("data: {}", chunk("lo"))),
            (400, "data: [DONE]".to_string()),
            (500, "garbage after the end".to_string()),
        ],
    );

    let call = track(t0, decode_lines(lines)).unwrap();

    assert_eq!(call.generated_text(), "Hello");
    assert_close(call.ttft, 0.1);
    assert_eq!(call.inter_token_latencies.len(), 1);
    assert_close(call.inter_token_latencies[0], 0.2);
    assert_close(call.total_time, 0.4);

    let mut store = MetricsStore::new();
    for (kind, value) in Measurement::Streaming(call).samples() {
        store.record("vLLM", "facebook/opt-125m", kind, value);
    }

    let series = |kind| store.series_for("vLLM", "facebook/opt-125m", kind).to_vec();
    assert_eq!(series(MetricKind::TotalTokens), vec![2.0]);
    assert_close(series(MetricKind::TimeToFirstToken)[0], 0.1);
    assert_close(series(MetricKind::ResponseTimes)[0], 0.4);
    assert_close(series(MetricKind::TimeBetweenTokens)[0], 0.2);
    assert_close(series(MetricKind::TimeBetweenTokensMedian)[0], 0.2);
    assert_close(series(MetricKind::TimeBetweenTokensP95)[0], 0.2);
    assert_close(series(MetricKind::TokensPerSecond)[0], 5.0);
}

#[test]
fn test_malformed_line_fails_the_call() {
    let t0 = Instant::now();
    let lines = body(
        t0,
        &[
            (100, format!("data: {}", chunk("a"))),
            (200, "data: {not json".to_string()),
            (300, "data: [DONE]".to_string()),
        ],
    );

    let err = track(t0, decode_lines(lines)).unwrap_err();
    match err {
        CallError::Decode(StreamDecodeError::InvalidJson { line_no, .. }) => assert_eq!(line_no, 2),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_missing_sentinel_is_incomplete() {
    let t0 = Instant::now();
    let lines = body(
        t0,
        &[
            (100, format!("data: {}", chunk("a"))),
            (200, format!("data: {}", chunk("b"))),
        ],
    );

    let err = track(t0, decode_lines(lines)).unwrap_err();
    assert!(matches!(err, CallError::IncompleteStream { tokens: 2 }));
}

#[test]
fn test_sentinel_before_tokens_is_empty() {
    let t0 = Instant::now();
    let lines = body(t0, &[(100, "data: [DONE]".to_string())]);

    let err = track(t0, decode_lines(lines)).unwrap_err();
    assert!(matches!(err, CallError::EmptyStream));
}

#[test]
fn test_store_cdf_and_percentiles() {
    let mut store = MetricsStore::new();
    for v in [0.4, 0.1, 0.3, 0.2] {
        store.record("vLLM", "m", MetricKind::ResponseTimes, v);
    }

    let cdf = store.cdf("vLLM", "m", MetricKind::ResponseTimes);
    let values: Vec<f64> = cdf.iter().map(|p| p.value).collect();
    let probabilities: Vec<f64> = cdf.iter().map(|p| p.probability).collect();
    assert_eq!(values, vec![0.1, 0.2, 0.3, 0.4]);
    assert_eq!(probabilities, vec![0.25, 0.5, 0.75, 1.0]);

    // series keep call order
    assert_eq!(
        store.series_for("vLLM", "m", MetricKind::ResponseTimes),
        &[0.4, 0.1, 0.3, 0.2]
    );
    assert_close(
        store
            .percentile("vLLM", "m", MetricKind::ResponseTimes, 50.0)
            .unwrap(),
        0.25,
    );
    assert!(store
        .percentile("vLLM", "m", MetricKind::TimeToFirstToken, 50.0)
        .is_none());
}

#[test]
fn test_store_to_persisted_items() {
    let mut store = MetricsStore::new();
    store.record("vLLM", "m", MetricKind::ResponseTimes, 0.5);
    store.record("vLLM", "m", MetricKind::ResponseTimes, 0.25);

    let document = BenchmarkDocument::from_store("prompt", &store, false).unwrap();
    let items = build_items(&document, &["common-model".to_string()], false).unwrap();

    assert_eq!(items.len(), 1);
    let metrics: serde_json::Value = serde_json::from_str(&items[0].metrics).unwrap();
    assert_eq!(
        metrics,
        serde_json::json!({
            "response_times": {
                "latencies": ["250.0", "500.0"],
                "cdf": ["0.5", "1.0"]
            }
        })
    );

    // cleaning an already clean value changes nothing
    assert_eq!(clean_data(metrics.clone()), metrics);
}

fn end_to_end_summary() -> RunSummary {
    let mut store = MetricsStore::new();
    store.record("vLLM", "facebook/opt-125m", MetricKind::ResponseTimes, 0.5);
    store.record("vLLM", "facebook/opt-125m", MetricKind::ResponseTimes, 0.25);
    RunSummary {
        store,
        pairs: vec![PairOutcome {
            provider: "vLLM".to_string(),
            model: "facebook/opt-125m".to_string(),
            successful: 2,
            failed: 0,
        }],
        pauses: 0,
        duration_secs: 1.0,
        streaming: false,
    }
}

fn scenario(output_dir: &std::path::Path, persist: &std::path::Path) -> Scenario {
    let mut scenario = parse_scenario(
        "name: publish\nproviders:\n  - name: vLLM\n    base_url: http://127.0.0.1:8000\n",
    )
    .unwrap();
    scenario.output_dir = output_dir.to_string_lossy().to_string();
    scenario.persist = Some(PersistConfig {
        path: persist.to_string_lossy().to_string(),
    });
    scenario
}

#[test]
fn test_publish_results_writes_artifacts_and_items() {
    let dir = tempfile::tempdir().unwrap();
    let items = dir.path().join("results").join("items.jsonl");
    let scenario = scenario(&dir.path().join("graphs"), &items);

    let outcome = publish_results(&scenario, &end_to_end_summary());

    assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.artifacts.len(), 1);
    assert!(outcome.artifacts[0].starts_with(dir.path().join("graphs").join("end_to_end").join("vllm")));
    assert_eq!(outcome.stored_items, 1);
    assert_eq!(std::fs::read_to_string(&items).unwrap().lines().count(), 1);
}

#[test]
fn test_publish_results_collects_every_failure() {
    let dir = tempfile::tempdir().unwrap();

    // artifact directory would have to live under a regular file
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, "x").unwrap();
    // item file path is an existing directory
    let items_dir = dir.path().join("items");
    std::fs::create_dir(&items_dir).unwrap();

    let scenario = scenario(&blocker.join("graphs"), &items_dir);
    let outcome = publish_results(&scenario, &end_to_end_summary());

    assert!(outcome.artifacts.is_empty());
    assert_eq!(outcome.stored_items, 0);
    assert_eq!(outcome.errors.len(), 2, "errors: {:?}", outcome.errors);
    assert!(outcome.errors[0].starts_with("response_times:"));
    assert!(outcome.errors[1].starts_with("failed to write item"));
}

#[test]
fn test_publish_results_persists_even_when_artifacts_fail() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, "x").unwrap();
    let items = dir.path().join("items.jsonl");

    let scenario = scenario(&blocker.join("graphs"), &items);
    let outcome = publish_results(&scenario, &end_to_end_summary());

    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.stored_items, 1);
    assert!(items.exists());
}
