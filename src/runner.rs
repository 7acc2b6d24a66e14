//! Sequential benchmark loop over providers, models and repetitions

use crate::config::{PacingConfig, PacingScope, Scenario};
use crate::error::CallError;
use crate::metrics::{MetricKind, MetricsStore};
use crate::provider::{InferenceProvider, InferenceRequest};
use crate::tracker::StreamingCall;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Outer-loop parameters of a run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model aliases, resolved by each provider
    pub models: Vec<String>,
    /// Calls per (provider, model) pair
    pub num_requests: usize,
    pub prompt: String,
    pub max_output: u32,
    pub streaming: bool,
    pub verbose: bool,
    pub pacing: PacingConfig,
}

impl RunConfig {
    pub fn from_scenario(scenario: &Scenario) -> Self {
        RunConfig {
            models: scenario.models.clone(),
            num_requests: scenario.num_requests,
            prompt: scenario.prompt.clone(),
            max_output: scenario.max_output,
            streaming: scenario.streaming,
            verbose: scenario.verbose,
            pacing: scenario.pacing.clone(),
        }
    }
}

/// What a successful call measured
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// Non-streaming round trip, seconds
    EndToEnd { elapsed: f64 },
    Streaming(StreamingCall),
}

/// Outcome of one inference call
pub type CallResult = Result<Measurement, CallError>;

impl Measurement {
    /// Samples this call contributes; derived values that are absent are
    /// left out rather than recorded as zero
    pub fn samples(&self) -> Vec<(MetricKind, f64)> {
        match self {
            Measurement::EndToEnd { elapsed } => vec![(MetricKind::ResponseTimes, *elapsed)],
            Measurement::Streaming(call) => {
                let mut samples = vec![
                    (MetricKind::TimeToFirstToken, call.ttft),
                    (MetricKind::ResponseTimes, call.total_time),
                ];
                let derived = [
                    (MetricKind::TimeBetweenTokens, call.avg_inter_token_latency()),
                    (MetricKind::TimeBetweenTokensMedian, call.median_inter_token_latency()),
                    (MetricKind::TimeBetweenTokensP95, call.p95_inter_token_latency()),
                ];
                samples.extend(derived.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));
                samples.push((MetricKind::TotalTokens, call.token_count() as f64));
                if let Some(tps) = call.tokens_per_second() {
                    samples.push((MetricKind::TokensPerSecond, tps));
                }
                samples
            }
        }
    }
}

/// Success and failure counts of one (provider, model) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairOutcome {
    pub provider: String,
    pub model: String,
    pub successful: usize,
    pub failed: usize,
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub store: MetricsStore,
    pub pairs: Vec<PairOutcome>,
    /// Pacing pauses actually taken
    pub pauses: usize,
    pub duration_secs: f64,
    pub streaming: bool,
}

impl RunSummary {
    pub fn successful_requests(&self) -> usize {
        self.pairs.iter().map(|p| p.successful).sum()
    }

    pub fn failed_requests(&self) -> usize {
        self.pairs.iter().map(|p| p.failed).sum()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.pairs.iter().map(|p| p.provider.as_str()).collect();
        names.dedup();
        names
    }
}

/// Decides when the rate-limit pause is due
#[derive(Debug)]
struct Pacer {
    config: PacingConfig,
    calls: usize,
    pauses: usize,
}

impl Pacer {
    fn new(config: PacingConfig) -> Self {
        Pacer {
            config,
            calls: 0,
            pauses: 0,
        }
    }

    fn start_pair(&mut self) {
        if self.config.scope == PacingScope::PerModel {
            self.calls = 0;
        }
    }

    /// Count one finished call; `more_in_pair` / `more_in_run` say whether
    /// any call follows in the pair and in the whole run
    async fn after_call(&mut self, more_in_pair: bool, more_in_run: bool) {
        self.calls += 1;
        let more = match self.config.scope {
            PacingScope::PerModel => more_in_pair,
            PacingScope::Run => more_in_run,
        };
        if !pause_due(self.calls, self.config.every, more) {
            return;
        }

        self.pauses += 1;
        info!(
            "Pacing: {} calls done, sleeping {}s for upstream rate limits",
            self.calls, self.config.pause_secs
        );
        sleep(self.config.pause()).await;
    }
}

/// A pause follows every `every`-th call unless nothing is left to pace
pub fn pause_due(calls_done: usize, every: usize, more_calls: bool) -> bool {
    every > 0 && calls_done > 0 && calls_done % every == 0 && more_calls
}

/// Runs the providers x models x repetitions loop
pub struct BenchmarkRunner {
    providers: Vec<Box<dyn InferenceProvider>>,
    config: RunConfig,
    show_progress: bool,
}

impl BenchmarkRunner {
    pub fn new(providers: Vec<Box<dyn InferenceProvider>>, config: RunConfig) -> Self {
        BenchmarkRunner {
            providers,
            config,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Issue every call in order and collect the samples
    ///
    /// Failing calls are logged and skipped; they never end the run.
    pub async fn run(&self) -> RunSummary {
        let start_time = Instant::now();
        let mut store = MetricsStore::new();
        let mut pairs = Vec::new();
        let mut pacer = Pacer::new(self.config.pacing.clone());

        let n = self.config.num_requests;
        let total_calls = self.providers.len() * self.config.models.len() * n;
        let mut calls_done = 0;

        for provider in &self.providers {
            info!("Provider: {}", provider.name());

            for model in &self.config.models {
                let model_name = provider.model_name(model);
                info!("Model: {} Prompt: {}", model_name, self.config.prompt);

                pacer.start_pair();
                let progress = self.progress_bar(provider.name(), &model_name);
                let mut outcome = PairOutcome {
                    provider: provider.name().to_string(),
                    model: model_name.clone(),
                    ..PairOutcome::default()
                };

                let request = InferenceRequest {
                    model: model.clone(),
                    prompt: self.config.prompt.clone(),
                    max_output: self.config.max_output,
                    verbose: self.config.verbose,
                };

                for i in 0..n {
                    debug!("Request {}/{}", i + 1, n);

                    match self.call(&**provider, &request).await {
                        Ok(measurement) => {
                            for (kind, value) in measurement.samples() {
                                store.record(provider.name(), &model_name, kind, value);
                            }
                            outcome.successful += 1;
                        }
                        Err(e) => {
                            warn!(
                                "Request {}/{} to {} ({}) failed: {}",
                                i + 1,
                                n,
                                provider.name(),
                                model_name,
                                e
                            );
                            outcome.failed += 1;
                        }
                    }

                    progress.inc(1);
                    calls_done += 1;
                    pacer.after_call(i + 1 < n, calls_done < total_calls).await;
                }

                progress.finish_and_clear();
                info!(
                    "{} / {}: {} succeeded, {} failed",
                    outcome.provider, outcome.model, outcome.successful, outcome.failed
                );
                pairs.push(outcome);
            }
        }

        RunSummary {
            store,
            pairs,
            pauses: pacer.pauses,
            duration_secs: start_time.elapsed().as_secs_f64(),
            streaming: self.config.streaming,
        }
    }

    async fn call(&self, provider: &dyn InferenceProvider, request: &InferenceRequest) -> CallResult {
        if self.config.streaming {
            provider
                .perform_inference_streaming(request)
                .await
                .map(Measurement::Streaming)
        } else {
            provider
                .perform_inference(request)
                .await
                .map(|elapsed| Measurement::EndToEnd { elapsed })
        }
    }

    fn progress_bar(&self, provider: &str, model: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(self.config.num_requests as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}",
        ) {
            progress.set_style(style.progress_chars("#>-"));
        }
        progress.set_message(format!("{} / {}", provider, model));
        progress
    }
}
