//! Result persistence
//!
//! A finished run is folded into a [`BenchmarkDocument`], cleaned, and split
//! into one [`StoredItem`] per (provider, model). Items go through a
//! [`DocumentStore`]; [`JsonlStore`] appends them to a JSON-lines file.

use crate::error::PersistenceError;
use crate::metrics::{MetricKind, MetricsStore};
use crate::stats;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Sorted samples and CDF of one metric, as persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    /// Milliseconds for durations, raw values otherwise
    pub latencies: Vec<f64>,
    pub cdf: Vec<f64>,
}

impl MetricRecord {
    pub fn from_samples(kind: MetricKind, samples: &[f64]) -> Self {
        let points = stats::cdf(samples);
        MetricRecord {
            latencies: points
                .iter()
                .map(|p| {
                    if kind.is_duration() {
                        p.value * 1000.0
                    } else {
                        p.value
                    }
                })
                .collect(),
            cdf: points.iter().map(|p| p.probability).collect(),
        }
    }
}

type ModelMetrics = Map<String, Value>;

/// Every reported metric of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkDocument {
    pub run_id: String,
    /// `%Y-%m-%d %H:%M:%S`, local time
    pub timestamp: String,
    pub prompt: String,
    /// provider -> model -> metric -> record
    pub providers: Map<String, Value>,
}

impl BenchmarkDocument {
    pub fn new(prompt: &str) -> Self {
        BenchmarkDocument {
            run_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            prompt: prompt.to_string(),
            providers: Map::new(),
        }
    }

    /// Build a document holding the metrics reported for the run's mode
    pub fn from_store(
        prompt: &str,
        store: &MetricsStore,
        streaming: bool,
    ) -> Result<Self, PersistenceError> {
        let mut document = BenchmarkDocument::new(prompt);
        for &kind in MetricKind::report_set(streaming) {
            for (provider, model, samples) in store.series_of(kind) {
                document.add_metric(provider, model, kind, samples)?;
            }
        }
        Ok(document)
    }

    pub fn add_metric(
        &mut self,
        provider: &str,
        model: &str,
        kind: MetricKind,
        samples: &[f64],
    ) -> Result<(), PersistenceError> {
        let record = serde_json::to_value(MetricRecord::from_samples(kind, samples))?;

        let models = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(models) = models {
            let metrics = models
                .entry(model.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(metrics) = metrics {
                metrics.insert(kind.as_str().to_string(), record);
            }
        }
        Ok(())
    }

    /// (provider, model, metrics) triples in key order
    pub fn entries(&self) -> Vec<(&str, &str, &ModelMetrics)> {
        let mut entries = Vec::new();
        for (provider, models) in &self.providers {
            let Value::Object(models) = models else {
                continue;
            };
            for (model, metrics) in models {
                if let Value::Object(metrics) = metrics {
                    entries.push((provider.as_str(), model.as_str(), metrics));
                }
            }
        }
        entries
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Recursively drop null, `""`, `[]` and `{}` and turn floats into decimal
/// strings
///
/// Emptiness is judged on the input value, so a container that only becomes
/// empty after cleaning is kept.
pub fn clean_data(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !is_empty_value(v))
                .map(|(k, v)| (k, clean_data(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !is_empty_value(v))
                .map(clean_data)
                .collect(),
        ),
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) => Value::String(decimal_string(f)),
            None => Value::Number(n),
        },
        other => other,
    }
}

/// Shortest decimal text that reads back as the same float
fn decimal_string(f: f64) -> String {
    let s = f.to_string();
    if f.is_finite() && !s.contains(['.', 'e', 'E']) {
        format!("{}.0", s)
    } else {
        s
    }
}

/// One stored row: the metrics of a (provider, model) pair in one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub id: String,
    pub run_id: String,
    pub timestamp: String,
    pub provider_name: String,
    pub model_name: String,
    pub model_key: String,
    pub prompt: String,
    /// Cleaned metrics object, serialized as a JSON string
    pub metrics: String,
    pub streaming: bool,
}

/// "common" when the run used the shared `common-model` alias first
pub fn model_key(models: &[String]) -> &'static str {
    match models.first() {
        Some(first) if first == "common-model" => "common",
        _ => "multi",
    }
}

/// Split a document into cleaned items, one per (provider, model)
pub fn build_items(
    document: &BenchmarkDocument,
    models: &[String],
    streaming: bool,
) -> Result<Vec<StoredItem>, PersistenceError> {
    let key = model_key(models);
    let mut items = Vec::new();

    for (provider, model, metrics) in document.entries() {
        let cleaned = clean_data(Value::Object(metrics.clone()));
        items.push(StoredItem {
            id: Uuid::new_v4().to_string(),
            run_id: document.run_id.clone(),
            timestamp: document.timestamp.clone(),
            provider_name: provider.to_string(),
            model_name: model.to_string(),
            model_key: key.to_string(),
            prompt: document.prompt.clone(),
            metrics: serde_json::to_string(&cleaned)?,
            streaming,
        });
    }
    Ok(items)
}

/// Destination for stored items
pub trait DocumentStore {
    fn put_item(&mut self, item: &StoredItem) -> Result<(), PersistenceError>;
}

/// Appends items as JSON lines to a local file
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for JsonlStore {
    fn put_item(&mut self, item: &StoredItem) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(item)?;
        let write_err = |source: std::io::Error| PersistenceError::Write {
            item_id: item.id.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        writeln!(file, "{}", line).map_err(write_err)?;
        Ok(())
    }
}

/// Persist every (provider, model) of a run; returns the number of items
/// written
pub fn store_data_points<S: DocumentStore + ?Sized>(
    store: &mut S,
    document: &BenchmarkDocument,
    models: &[String],
    streaming: bool,
) -> Result<usize, PersistenceError> {
    let items = build_items(document, models, streaming)?;
    for item in &items {
        debug!("Storing {} / {} ({})", item.provider_name, item.model_name, item.id);
        store.put_item(item)?;
    }
    info!(
        "Stored {} items for run ID {}",
        items.len(),
        document.run_id
    );
    Ok(items.len())
}
