//! LLM Latency Bench - streaming latency benchmark for LLM inference APIs
//!
//! Raw stream lines are decoded into [`StreamEvent`]s, timed by a
//! [`LatencyTracker`], and accumulated per (provider, model, metric) in a
//! [`MetricsStore`]. The [`BenchmarkRunner`] drives the calls; [`report`]
//! and [`persist`] turn the store into summaries, CDF artifacts and stored
//! items.

pub mod config;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod persist;
pub mod provider;
pub mod report;
pub mod runner;
pub mod stats;
pub mod tracker;

use anyhow::Result;
use tracing::{info, warn};

pub use config::{
    load_scenario_from_file, parse_scenario, PacingConfig, PacingScope, PersistConfig,
    ProviderConfig, Scenario,
};
pub use decoder::{decode_lines, LineBuffer, StreamDecoder, StreamEvent};
pub use error::{CallError, PersistenceError, StreamDecodeError};
pub use metrics::{MetricKind, MetricsStore};
pub use persist::{BenchmarkDocument, DocumentStore, JsonlStore, StoredItem};
pub use provider::{InferenceProvider, InferenceRequest, OpenAiCompatibleProvider};
pub use report::{print_summary, save_summary_to_file, CdfReporter};
pub use runner::{BenchmarkRunner, CallResult, Measurement, PairOutcome, RunConfig, RunSummary};
pub use stats::{CdfPoint, Summary};
pub use tracker::{LatencyTracker, StreamingCall};

/// Instantiate every provider of a scenario
pub fn build_providers(scenario: &Scenario) -> Result<Vec<Box<dyn InferenceProvider>>> {
    scenario
        .providers
        .iter()
        .map(|config| {
            let provider = OpenAiCompatibleProvider::new(config, scenario.timeout())?;
            Ok(Box::new(provider) as Box<dyn InferenceProvider>)
        })
        .collect()
}

/// Run a full benchmark scenario
pub async fn run_scenario(scenario: &Scenario, show_progress: bool) -> Result<RunSummary> {
    info!("Running scenario: {}", scenario.name);
    if let Some(desc) = &scenario.description {
        info!("Description: {}", desc);
    }

    let providers = build_providers(scenario)?;
    let runner = BenchmarkRunner::new(providers, RunConfig::from_scenario(scenario))
        .with_progress(show_progress);
    let summary = runner.run().await;

    info!(
        "Scenario '{}' finished: {} succeeded, {} failed, {} pauses",
        scenario.name,
        summary.successful_requests(),
        summary.failed_requests(),
        summary.pauses
    );
    Ok(summary)
}

/// What was written after a run
#[derive(Debug, Default)]
pub struct PublishOutcome {
    pub artifacts: Vec<std::path::PathBuf>,
    pub stored_items: usize,
    /// Failures that did not stop the remaining outputs
    pub errors: Vec<String>,
}

/// Write CDF artifacts and persist the run when the scenario asks for it
///
/// Every output is attempted; failures are collected, never raised.
pub fn publish_results(scenario: &Scenario, summary: &RunSummary) -> PublishOutcome {
    let mut outcome = PublishOutcome::default();

    let reporter = CdfReporter::new(
        &scenario.output_dir,
        summary.streaming,
        &summary.provider_names(),
    );
    for (metric, result) in reporter.render_all(&summary.store) {
        match result {
            Ok(Some(path)) => outcome.artifacts.push(path),
            Ok(None) => info!("No samples for {}, skipping CDF", metric),
            Err(e) => {
                warn!("Failed to write CDF for {}: {:#}", metric, e);
                outcome.errors.push(format!("{}: {:#}", metric, e));
            }
        }
    }

    if let Some(persist) = &scenario.persist {
        let mut store = JsonlStore::new(&persist.path);
        let stored = BenchmarkDocument::from_store(&scenario.prompt, &summary.store, summary.streaming)
            .and_then(|document| {
                persist::store_data_points(&mut store, &document, &scenario.models, summary.streaming)
            });
        match stored {
            Ok(count) => outcome.stored_items = count,
            Err(e) => {
                warn!("Failed to persist results to {}: {}", persist.path, e);
                outcome.errors.push(e.to_string());
            }
        }
    }

    outcome
}
