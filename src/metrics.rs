//! Typed in-memory store of benchmark samples
//!
//! Samples are grouped by provider, then model, then [`MetricKind`]. Each
//! series keeps call order and only ever grows.

use crate::stats::{self, CdfPoint, Summary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The fixed metric vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MetricKind {
    #[serde(rename = "response_times")]
    ResponseTimes,
    #[serde(rename = "timetofirsttoken")]
    TimeToFirstToken,
    #[serde(rename = "timebetweentokens")]
    TimeBetweenTokens,
    #[serde(rename = "timebetweentokens_median")]
    TimeBetweenTokensMedian,
    #[serde(rename = "timebetweentokens_p95")]
    TimeBetweenTokensP95,
    #[serde(rename = "totaltokens")]
    TotalTokens,
    #[serde(rename = "tps")]
    TokensPerSecond,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::ResponseTimes,
        MetricKind::TimeToFirstToken,
        MetricKind::TimeBetweenTokens,
        MetricKind::TimeBetweenTokensMedian,
        MetricKind::TimeBetweenTokensP95,
        MetricKind::TotalTokens,
        MetricKind::TokensPerSecond,
    ];

    /// Metrics reported after a streaming run
    pub const STREAMING_REPORT: [MetricKind; 6] = [
        MetricKind::TimeToFirstToken,
        MetricKind::ResponseTimes,
        MetricKind::TimeBetweenTokens,
        MetricKind::TimeBetweenTokensMedian,
        MetricKind::TimeBetweenTokensP95,
        MetricKind::TokensPerSecond,
    ];

    /// Metrics reported after a non-streaming run
    pub const END_TO_END_REPORT: [MetricKind; 1] = [MetricKind::ResponseTimes];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ResponseTimes => "response_times",
            MetricKind::TimeToFirstToken => "timetofirsttoken",
            MetricKind::TimeBetweenTokens => "timebetweentokens",
            MetricKind::TimeBetweenTokensMedian => "timebetweentokens_median",
            MetricKind::TimeBetweenTokensP95 => "timebetweentokens_p95",
            MetricKind::TotalTokens => "totaltokens",
            MetricKind::TokensPerSecond => "tps",
        }
    }

    /// Durations are stored in seconds and shown in milliseconds
    pub fn is_duration(&self) -> bool {
        !matches!(self, MetricKind::TotalTokens | MetricKind::TokensPerSecond)
    }

    pub fn report_set(streaming: bool) -> &'static [MetricKind] {
        if streaming {
            &Self::STREAMING_REPORT
        } else {
            &Self::END_TO_END_REPORT
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ModelSeries = BTreeMap<MetricKind, Vec<f64>>;

/// Samples keyed by (provider, model, metric)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsStore {
    providers: BTreeMap<String, BTreeMap<String, ModelSeries>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, creating the series on first use
    pub fn record(&mut self, provider: &str, model: &str, kind: MetricKind, value: f64) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .entry(model.to_string())
            .or_default()
            .entry(kind)
            .or_default()
            .push(value);
    }

    /// Recorded values in call order; empty when nothing was recorded
    pub fn series_for(&self, provider: &str, model: &str, kind: MetricKind) -> &[f64] {
        self.providers
            .get(provider)
            .and_then(|models| models.get(model))
            .and_then(|series| series.get(&kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cdf(&self, provider: &str, model: &str, kind: MetricKind) -> Vec<CdfPoint> {
        stats::cdf(self.series_for(provider, model, kind))
    }

    pub fn percentile(&self, provider: &str, model: &str, kind: MetricKind, p: f64) -> Option<f64> {
        stats::percentile(&stats::sorted(self.series_for(provider, model, kind)), p)
    }

    pub fn summary(&self, provider: &str, model: &str, kind: MetricKind) -> Option<Summary> {
        Summary::of(self.series_for(provider, model, kind))
    }

    /// Every (provider, model) pair with at least one sample
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        self.providers
            .iter()
            .flat_map(|(provider, models)| {
                models
                    .keys()
                    .map(move |model| (provider.as_str(), model.as_str()))
            })
            .collect()
    }

    /// Every recorded series as (provider, model, metric, values), ordered
    /// by provider, model, then metric
    pub fn series(&self) -> impl Iterator<Item = (&str, &str, MetricKind, &[f64])> + '_ {
        self.providers.iter().flat_map(|(provider, models)| {
            models.iter().flat_map(move |(model, series)| {
                series.iter().map(move |(kind, values)| {
                    (provider.as_str(), model.as_str(), *kind, values.as_slice())
                })
            })
        })
    }

    /// All non-empty series of one metric as (provider, model, values)
    pub fn series_of(&self, kind: MetricKind) -> Vec<(&str, &str, &[f64])> {
        self.providers
            .iter()
            .flat_map(|(provider, models)| {
                models.iter().filter_map(move |(model, series)| {
                    series
                        .get(&kind)
                        .filter(|values| !values.is_empty())
                        .map(|values| (provider.as_str(), model.as_str(), values.as_slice()))
                })
            })
            .collect()
    }

    /// All series recorded for one pair, ordered by metric
    pub fn metrics_for(&self, provider: &str, model: &str) -> Vec<(MetricKind, &[f64])> {
        self.providers
            .get(provider)
            .and_then(|models| models.get(model))
            .map(|series| {
                series
                    .iter()
                    .map(|(kind, values)| (*kind, values.as_slice()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append every series of `other` after the matching series here
    pub fn merge(&mut self, other: MetricsStore) {
        for (provider, models) in other.providers {
            let provider_models = self.providers.entry(provider).or_default();
            for (model, series) in models {
                let model_series = provider_models.entry(model).or_default();
                for (kind, values) in series {
                    model_series.entry(kind).or_default().extend(values);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Total number of samples across all series
    pub fn sample_count(&self) -> usize {
        self.providers
            .values()
            .flat_map(|models| models.values())
            .flat_map(|series| series.values())
            .map(Vec::len)
            .sum()
    }
}
