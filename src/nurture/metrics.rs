// SPDX-License-Identifier: MIT

//! Per-node execution metrics and run counters
//!
//! The collector listens to engine events; nothing in the workflow reads it.
//! With a journal attached, every `NodeExecutionMetric` is also appended as
//! one JSON line and replayed when the collector is reopened. Run counters
//! cover the current process only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::StoreError;
use crate::nurture::workflow::engine::{EngineEvent, EngineObserver};

/// How many raw metrics are kept for inspection
const RECENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionMetric {
    pub node_name: String,
    pub run_id: String,
    pub success: bool,
    #[serde(serialize_with = "serialize_millis", deserialize_with = "deserialize_millis")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

fn deserialize_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let millis = f64::deserialize(d)?;
    if !millis.is_finite() || millis < 0.0 {
        return Err(serde::de::Error::custom(format!("invalid duration {}ms", millis)));
    }
    Ok(Duration::from_secs_f64(millis / 1000.0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    pub count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub started: u64,
    /// Suspension events, not currently suspended runs
    pub suspended: u64,
    pub completed: u64,
    pub terminated: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct NodeAggregate {
    count: u64,
    successes: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

impl NodeAggregate {
    fn add(&mut self, metric: &NodeExecutionMetric) {
        self.count += 1;
        if metric.success {
            self.successes += 1;
        }
        self.total += metric.duration;
        self.min = Some(self.min.map_or(metric.duration, |m| m.min(metric.duration)));
        self.max = self.max.max(metric.duration);
    }

    fn stats(&self) -> NodeStats {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        NodeStats {
            count: self.count,
            success_rate: self.successes as f64 / self.count as f64,
            avg_duration_ms: ms(self.total) / self.count as f64,
            min_duration_ms: ms(self.min.unwrap_or_default()),
            max_duration_ms: ms(self.max),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, NodeAggregate>,
    recent: VecDeque<NodeExecutionMetric>,
    runs: RunStats,
    journal: Option<File>,
}

impl Inner {
    fn aggregate(&mut self, metric: NodeExecutionMetric) {
        self.nodes
            .entry(metric.node_name.clone())
            .or_default()
            .add(&metric);
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(metric);
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector backed by a JSON-lines journal at `path`, created if missing.
    /// Metrics already in the journal are loaded first; unreadable lines are
    /// skipped.
    pub fn open_journal(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut inner = Inner::default();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                for (n, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NodeExecutionMetric>(line) {
                        Ok(metric) => inner.aggregate(metric),
                        Err(e) => log::warn!("{:?} line {}: skipping metric: {}", path, n + 1, e),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        inner.journal = Some(OpenOptions::new().create(true).append(true).open(path)?);
        log::debug!(
            "Metrics journal {:?}: {} node(s) loaded",
            path,
            inner.nodes.len()
        );
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    pub fn record(&self, metric: NodeExecutionMetric) {
        self.with_inner(|inner| {
            if let Some(journal) = inner.journal.as_mut() {
                // one write per line keeps appends from other processes whole
                let written = serde_json::to_string(&metric)
                    .map_err(std::io::Error::from)
                    .and_then(|line| journal.write_all(format!("{}\n", line).as_bytes()));
                if let Err(e) = written {
                    log::warn!("Could not journal metric for {}: {}", metric.node_name, e);
                }
            }
            inner.aggregate(metric);
        });
    }

    /// Stats for one node, `None` if it never ran
    pub fn node_stats(&self, name: &str) -> Option<NodeStats> {
        self.with_inner(|inner| inner.nodes.get(name).map(NodeAggregate::stats))
    }

    pub fn all_node_stats(&self) -> BTreeMap<String, NodeStats> {
        self.with_inner(|inner| {
            inner
                .nodes
                .iter()
                .map(|(name, agg)| (name.clone(), agg.stats()))
                .collect()
        })
    }

    pub fn run_stats(&self) -> RunStats {
        self.with_inner(|inner| inner.runs.clone())
    }

    /// Most recent raw metrics, newest last
    pub fn recent(&self, limit: usize) -> Vec<NodeExecutionMetric> {
        self.with_inner(|inner| {
            let skip = inner.recent.len().saturating_sub(limit);
            inner.recent.iter().skip(skip).cloned().collect()
        })
    }
}

impl EngineObserver for MetricsCollector {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::RunStarted { .. } => self.with_inner(|inner| inner.runs.started += 1),
            EngineEvent::NodeFinished {
                run_id,
                node,
                duration,
                error_kind,
                at,
            } => self.record(NodeExecutionMetric {
                node_name: node.clone(),
                run_id: run_id.clone(),
                success: error_kind.is_none(),
                duration: *duration,
                timestamp: *at,
                error_kind: error_kind.clone(),
            }),
            EngineEvent::RunSuspended { .. } => self.with_inner(|inner| inner.runs.suspended += 1),
            EngineEvent::RunTerminated { status, .. } => self.with_inner(|inner| {
                inner.runs.completed += 1;
                *inner
                    .runs
                    .terminated
                    .entry(status.as_str().to_string())
                    .or_insert(0) += 1;
            }),
        }
    }
}
