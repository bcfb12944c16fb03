//! Control-loop latency and per-tuple-type CPU time accounting.
//!
//! One [`LatencyTracker`] is owned by each simulation run and handed to the
//! router by reference; nothing here is process-global.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::application::LoopId;
use crate::tuple::Tuple;
use crate::types::{SimTime, TupleId};

/// Incrementally updated arithmetic mean.
///
/// `mean_n = mean_{n-1} + (x_n - mean_{n-1}) / n`
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningMean {
    pub mean: f64,
    pub count: u64,
}

impl RunningMean {
    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        self.mean += (sample - self.mean) / self.count as f64;
    }

    /// The mean, or `None` before the first sample.
    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }
}

/// Point-in-time copy of everything the tracker has accumulated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub loops: BTreeMap<String, RunningMean>,
    pub tuple_cpu: BTreeMap<String, RunningMean>,
    pub tuples_created: BTreeMap<String, u64>,
    pub deadline_misses: BTreeMap<String, u64>,
}

/// Accumulates loop delays and tuple execution times.
///
/// # Example
///
/// ```
/// use fogloop::application::LoopId;
/// use fogloop::tracker::LatencyTracker;
///
/// let mut tracker = LatencyTracker::new();
/// let id = LoopId::new("app", 0);
/// for (start, end) in [(0.0, 10.0), (5.0, 25.0), (10.0, 40.0)] {
///     tracker.on_loop_closed(&id, start, end);
/// }
/// assert_eq!(tracker.loop_average(&id), Some(20.0));
/// ```
#[derive(Clone, Debug, Default)]
pub struct LatencyTracker {
    loops: BTreeMap<LoopId, RunningMean>,
    tuple_cpu: BTreeMap<String, RunningMean>,
    execution_started: HashMap<TupleId, SimTime>,
    tuples_created: BTreeMap<String, u64>,
    deadline_misses: BTreeMap<String, u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a newly created tuple under its type.
    pub fn on_tuple_created(&mut self, tuple: &Tuple, timestamp: SimTime) {
        *self.tuples_created.entry(tuple.tuple_type.clone()).or_default() += 1;
        tracing::trace!(tuple = tuple.id, kind = %tuple.tuple_type, timestamp, "tuple created");
    }

    pub fn on_execution_start(&mut self, tuple_id: TupleId, timestamp: SimTime) {
        self.execution_started.insert(tuple_id, timestamp);
    }

    /// Folds the execution time of `tuple` into its type's mean.
    ///
    /// Ignored if no matching start was recorded.
    pub fn on_execution_end(&mut self, tuple: &Tuple, timestamp: SimTime) {
        if let Some(start) = self.execution_started.remove(&tuple.id) {
            self.tuple_cpu
                .entry(tuple.tuple_type.clone())
                .or_default()
                .push(timestamp - start);
        }
    }

    pub fn on_loop_closed(&mut self, loop_id: &LoopId, start: SimTime, end: SimTime) {
        let record = self.loops.entry(loop_id.clone()).or_default();
        record.push(end - start);
        tracing::debug!(
            loop_id = %loop_id,
            delay = end - start,
            average = record.mean,
            "control loop closed"
        );
    }

    pub fn on_deadline_miss(&mut self, tuple: &Tuple) {
        *self.deadline_misses.entry(tuple.tuple_type.clone()).or_default() += 1;
    }

    /// Mean delay of a control loop over all closures so far.
    pub fn loop_average(&self, loop_id: &LoopId) -> Option<f64> {
        self.loops.get(loop_id).and_then(RunningMean::value)
    }

    /// Number of closures observed for a control loop.
    pub fn loop_closures(&self, loop_id: &LoopId) -> u64 {
        self.loops.get(loop_id).map(|r| r.count).unwrap_or(0)
    }

    /// Mean execution time of tuples of `tuple_type`.
    pub fn tuple_type_average(&self, tuple_type: &str) -> Option<f64> {
        self.tuple_cpu.get(tuple_type).and_then(RunningMean::value)
    }

    pub fn tuples_created(&self, tuple_type: &str) -> u64 {
        self.tuples_created.get(tuple_type).copied().unwrap_or(0)
    }

    pub fn deadline_misses(&self, tuple_type: &str) -> u64 {
        self.deadline_misses.get(tuple_type).copied().unwrap_or(0)
    }

    /// Loop averages keyed by loop identity.
    pub fn loop_averages(&self) -> impl Iterator<Item = (&LoopId, f64)> {
        self.loops.iter().filter_map(|(id, r)| r.value().map(|v| (id, v)))
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            loops: self
                .loops
                .iter()
                .map(|(id, r)| (id.to_string(), *r))
                .collect(),
            tuple_cpu: self.tuple_cpu.clone(),
            tuples_created: self.tuples_created.clone(),
            deadline_misses: self.deadline_misses.clone(),
        }
    }
}
