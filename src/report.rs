//! Results display and CDF artifacts
//!
//! The console report shows one block per (provider, model) pair and a
//! comparison table when more than one pair was measured. CDF artifacts are
//! JSON files, one per metric, holding every pair's sorted samples and
//! cumulative probabilities, ready for an external plotting step.

use crate::metrics::{MetricKind, MetricsStore};
use crate::runner::RunSummary;
use crate::stats;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

fn unit(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::TotalTokens => "tokens",
        MetricKind::TokensPerSecond => "tok/s",
        _ => "ms",
    }
}

/// Stored value -> display value (seconds become milliseconds)
fn scale(kind: MetricKind, value: f64) -> f64 {
    if kind.is_duration() {
        value * 1000.0
    } else {
        value
    }
}

fn title(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::ResponseTimes => "Total Response Time",
        MetricKind::TimeToFirstToken => "Time to First Token",
        MetricKind::TimeBetweenTokens => "Time Between Tokens (mean per request)",
        MetricKind::TimeBetweenTokensMedian => "Time Between Tokens (median per request)",
        MetricKind::TimeBetweenTokensP95 => "Time Between Tokens (p95 per request)",
        MetricKind::TotalTokens => "Tokens per Request",
        MetricKind::TokensPerSecond => "Tokens per Second",
    }
}

/// Metrics shown in the console report
fn console_metrics(streaming: bool) -> Vec<MetricKind> {
    let mut metrics = MetricKind::report_set(streaming).to_vec();
    if streaming {
        metrics.push(MetricKind::TotalTokens);
    }
    metrics
}

// ============================================================================
// Console / text report
// ============================================================================

pub fn write_summary<W: Write>(out: &mut W, summary: &RunSummary) -> Result<()> {
    for pair in &summary.pairs {
        writeln!(out, "============ {} - {} ============", pair.provider, pair.model)?;
        writeln!(
            out,
            "Successful requests:                     {}",
            pair.successful
        )?;
        writeln!(
            out,
            "Failed requests:                         {}",
            pair.failed
        )?;

        for kind in console_metrics(summary.streaming) {
            let Some(s) = summary.store.summary(&pair.provider, &pair.model, kind) else {
                continue;
            };
            let u = unit(kind);
            writeln!(out, "{:-^50}", title(kind))?;
            writeln!(out, "{:<41}{}", "Samples:", s.count)?;
            for (label, value) in [
                ("Mean", s.mean),
                ("Median", s.p50),
                ("P90", s.p90),
                ("P95", s.p95),
                ("P99", s.p99),
                ("P100", s.max),
            ] {
                writeln!(
                    out,
                    "{:<41}{:.2}",
                    format!("{} ({}):", label, u),
                    scale(kind, value)
                )?;
            }
        }
        writeln!(out, "==================================================")?;
        writeln!(out)?;
    }

    writeln!(
        out,
        "Benchmark duration (s):                  {:.2}",
        summary.duration_secs
    )?;
    writeln!(
        out,
        "Rate-limit pauses:                       {}",
        summary.pauses
    )?;

    if summary.pairs.len() > 1 {
        write_comparison(out, summary)?;
    }
    Ok(())
}

fn write_comparison<W: Write>(out: &mut W, summary: &RunSummary) -> Result<()> {
    let store = &summary.store;
    let names: Vec<String> = summary
        .pairs
        .iter()
        .map(|p| format!("{} - {}", p.provider, p.model))
        .collect();

    let col_width = names.iter().map(String::len).max().unwrap_or(0).max(12);
    let metric_width = 28;
    let total_width = metric_width + (col_width + 3) * names.len() + 10;
    let separator = "=".repeat(total_width);

    writeln!(out, "\n{}", separator)?;
    writeln!(out, "Comparison: {}", names.join(" vs "))?;
    writeln!(out, "{}", separator)?;

    write!(out, "{:<width$}", "Metric", width = metric_width)?;
    for name in &names {
        write!(out, " | {:<width$}", name, width = col_width)?;
    }
    writeln!(out, " | Winner")?;
    writeln!(out, "{}", "-".repeat(total_width))?;

    for kind in console_metrics(summary.streaming) {
        if kind == MetricKind::TotalTokens {
            continue;
        }
        let lower_is_better = kind.is_duration();

        for (label, p) in [("Median", 50.0), ("P95", 95.0)] {
            let values: Vec<Option<f64>> = summary
                .pairs
                .iter()
                .map(|pair| store.percentile(&pair.provider, &pair.model, kind, p))
                .collect();
            if values.iter().all(Option::is_none) {
                continue;
            }

            write!(
                out,
                "{:<width$}",
                format!("{} {} ({})", label, kind, unit(kind)),
                width = metric_width
            )?;
            for v in &values {
                let cell = v
                    .map(|v| format!("{:.2}", scale(kind, v)))
                    .unwrap_or_else(|| "-".to_string());
                write!(out, " | {:<width$}", cell, width = col_width)?;
            }
            match find_winner(&values, lower_is_better) {
                Some(idx) => writeln!(out, " | {}", names[idx])?,
                None => writeln!(out, " | -")?,
            }
        }
    }

    writeln!(out, "{}", separator)?;
    Ok(())
}

/// Index of the best value; lowest for latencies, highest for throughput
fn find_winner(values: &[Option<f64>], lower_is_better: bool) -> Option<usize> {
    let present = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)));
    if lower_is_better {
        present.min_by(|(_, a), (_, b)| a.total_cmp(b)).map(|(i, _)| i)
    } else {
        present.max_by(|(_, a), (_, b)| a.total_cmp(b)).map(|(i, _)| i)
    }
}

pub fn print_summary(summary: &RunSummary) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out)?;
    write_summary(&mut out, summary)
}

/// Generate a timestamped summary filename
pub fn generate_output_filename(scenario_name: &str, output_dir: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let safe_name = scenario_name.replace([' ', '/'], "_").to_lowercase();
    format!("{}/{}_{}.txt", output_dir, safe_name, timestamp)
}

/// Save the text summary to a file
pub fn save_summary_to_file(summary: &RunSummary, scenario_name: &str, output_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(output_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path))?;

    writeln!(file, "# Benchmark Results: {}", scenario_name)?;
    writeln!(
        file,
        "# Generated: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(file, "# Mode: {}", mode_dir(summary.streaming))?;
    writeln!(file)?;
    write_summary(&mut file, summary)?;

    info!("Results saved to: {}", output_path);
    Ok(())
}

// ============================================================================
// CDF artifacts
// ============================================================================

/// One (provider, model) curve of a CDF artifact
#[derive(Debug, Clone, Serialize)]
pub struct CdfSeries {
    pub provider: String,
    pub model: String,
    pub label: String,
    /// Sorted samples in display units
    pub values: Vec<f64>,
    pub cdf: Vec<f64>,
}

/// Everything needed to draw one metric's CDF chart
#[derive(Debug, Clone, Serialize)]
pub struct CdfArtifact {
    pub metric: MetricKind,
    pub unit: &'static str,
    pub x_label: String,
    pub y_label: &'static str,
    pub series: Vec<CdfSeries>,
}

impl CdfArtifact {
    pub fn from_store(store: &MetricsStore, metric: MetricKind) -> CdfArtifact {
        let series = store
            .series_of(metric)
            .into_iter()
            .map(|(provider, model, values)| {
                let points = stats::cdf(values);
                CdfSeries {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    label: format!("{} - {}", provider, model),
                    values: points.iter().map(|p| scale(metric, p.value)).collect(),
                    cdf: points.iter().map(|p| p.probability).collect(),
                }
            })
            .collect();

        CdfArtifact {
            metric,
            unit: unit(metric),
            x_label: format!("{} ({})", title(metric), unit(metric)),
            y_label: "Portion of requests",
            series,
        }
    }
}

fn mode_dir(streaming: bool) -> &'static str {
    if streaming {
        "streaming"
    } else {
        "end_to_end"
    }
}

/// Writes CDF artifacts under `<output>/<mode>/<providers>/`
#[derive(Debug, Clone)]
pub struct CdfReporter {
    graph_dir: PathBuf,
    streaming: bool,
}

impl CdfReporter {
    pub fn new(output_dir: impl AsRef<Path>, streaming: bool, provider_names: &[&str]) -> Self {
        let mut names: Vec<String> = provider_names.iter().map(|n| n.to_lowercase()).collect();
        names.sort();
        names.dedup();

        let graph_dir = output_dir
            .as_ref()
            .join(mode_dir(streaming))
            .join(names.join("_"));

        CdfReporter { graph_dir, streaming }
    }

    pub fn graph_dir(&self) -> &Path {
        &self.graph_dir
    }

    fn file_stem(&self, metric: MetricKind) -> &'static str {
        match metric {
            MetricKind::ResponseTimes if self.streaming => "totaltime",
            _ => metric.as_str(),
        }
    }

    /// Write one metric's artifact; `None` when no pair has samples for it
    pub fn render(&self, store: &MetricsStore, metric: MetricKind) -> Result<Option<PathBuf>> {
        let artifact = CdfArtifact::from_store(store, metric);
        if artifact.series.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.graph_dir)
            .with_context(|| format!("Failed to create {}", self.graph_dir.display()))?;

        let current_time = chrono::Local::now().format("%y%m%d_%H%M");
        let path = self
            .graph_dir
            .join(format!("{}_{}.json", self.file_stem(metric), current_time));

        let json = serde_json::to_string_pretty(&artifact)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Saved CDF data: {}", path.display());
        Ok(Some(path))
    }

    /// Render every metric of the run's mode; one failure does not stop the
    /// remaining metrics
    pub fn render_all(&self, store: &MetricsStore) -> Vec<(MetricKind, Result<Option<PathBuf>>)> {
        MetricKind::report_set(self.streaming)
            .iter()
            .map(|&metric| (metric, self.render(store, metric)))
            .collect()
    }
}
