//! Per-call latency tracking over decoded stream events

use crate::decoder::StreamEvent;
use crate::error::{CallError, StreamDecodeError};
use crate::stats;
use serde::Serialize;
use std::time::Instant;

/// Timings and text of one completed streaming call
///
/// Durations are in seconds. `inter_token_latencies` has exactly one entry
/// fewer than `tokens`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingCall {
    pub tokens: Vec<String>,
    /// Time to first token
    pub ttft: f64,
    /// Request start to termination sentinel
    pub total_time: f64,
    pub inter_token_latencies: Vec<f64>,
}

impl StreamingCall {
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn generated_text(&self) -> String {
        self.tokens.concat()
    }

    /// Mean time between tokens. `None` for single-token responses.
    pub fn avg_inter_token_latency(&self) -> Option<f64> {
        stats::mean(&self.inter_token_latencies)
    }

    pub fn median_inter_token_latency(&self) -> Option<f64> {
        stats::median(&stats::sorted(&self.inter_token_latencies))
    }

    pub fn p95_inter_token_latency(&self) -> Option<f64> {
        stats::percentile(&stats::sorted(&self.inter_token_latencies), 95.0)
    }

    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.total_time > 0.0 {
            Some(self.token_count() as f64 / self.total_time)
        } else {
            None
        }
    }
}

/// Folds the events of one call into a [`StreamingCall`]
#[derive(Debug)]
pub struct LatencyTracker {
    start: Instant,
    ttft: Option<f64>,
    prev_token_time: Option<Instant>,
    tokens: Vec<String>,
    inter_token_latencies: Vec<f64>,
    total_time: Option<f64>,
}

impl LatencyTracker {
    /// `start` is taken by the caller right before the request is issued
    pub fn new(start: Instant) -> Self {
        LatencyTracker {
            start,
            ttft: None,
            prev_token_time: None,
            tokens: Vec::new(),
            inter_token_latencies: Vec::new(),
            total_time: None,
        }
    }

    /// Feed one event; returns true once the stream has terminated
    ///
    /// Events after termination are ignored.
    pub fn observe(&mut self, event: StreamEvent) -> bool {
        if self.total_time.is_some() {
            return true;
        }

        match event {
            StreamEvent::FirstToken { at, text } | StreamEvent::DataChunk { at, text } => {
                match self.prev_token_time {
                    None => {
                        self.ttft = Some(self.elapsed_at(at));
                    }
                    Some(prev) => {
                        self.inter_token_latencies
                            .push(at.saturating_duration_since(prev).as_secs_f64());
                    }
                }
                self.prev_token_time = Some(at);
                self.tokens.push(text);
                false
            }
            StreamEvent::Termination { at } => {
                self.total_time = Some(self.elapsed_at(at));
                true
            }
            StreamEvent::Ignorable => false,
        }
    }

    pub fn tokens_seen(&self) -> usize {
        self.tokens.len()
    }

    /// Close out the call
    ///
    /// Fails with `IncompleteStream` when no sentinel arrived and with
    /// `EmptyStream` when the sentinel arrived before any token.
    pub fn finish(self) -> Result<StreamingCall, CallError> {
        let total_time = self.total_time.ok_or(CallError::IncompleteStream {
            tokens: self.tokens.len(),
        })?;
        let ttft = self.ttft.ok_or(CallError::EmptyStream)?;

        Ok(StreamingCall {
            tokens: self.tokens,
            ttft,
            // total >= ttft even for out-of-order caller timestamps
            total_time: total_time.max(ttft),
            inter_token_latencies: self.inter_token_latencies,
        })
    }

    fn elapsed_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.start).as_secs_f64()
    }
}

/// Track a whole decoded event sequence
///
/// The first decode error fails the call and nothing gathered so far
/// survives.
pub fn track<I>(start: Instant, events: I) -> Result<StreamingCall, CallError>
where
    I: IntoIterator<Item = Result<StreamEvent, StreamDecodeError>>,
{
    let mut tracker = LatencyTracker::new(start);
    for event in events {
        if tracker.observe(event?) {
            break;
        }
    }
    tracker.finish()
}
