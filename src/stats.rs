//! Run statistics and their JSON export.
//!
//! A [`SimulationStats`] is a plain serialisable snapshot taken from a
//! [`FogSimulation`](crate::engine::FogSimulation); it does not change once
//! taken.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::router::{DeviceUsage, RouterCounters};
use crate::tracker::LatencySnapshot;
use crate::types::SimTime;

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Simulation metadata
    pub metadata: SimulationMetadata,

    /// Event queue statistics
    pub engine: EngineStats,

    /// Routing counters
    pub routing: RouterCounters,

    /// Loop and tuple-type latencies
    pub latency: LatencySnapshot,

    /// Per-device work, keyed by device name
    pub devices: BTreeMap<String, DeviceUsage>,

    /// `app -> module -> device name`
    pub placements: BTreeMap<String, BTreeMap<String, String>>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Simulation name/description
    pub name: String,

    /// Crate version that produced the snapshot
    pub version: String,
}

/// Event queue statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Simulated time of the last dispatched event
    pub final_time: SimTime,

    /// Deadline of the run
    pub max_time: SimTime,

    /// Events handed to the router
    pub events_dispatched: u64,

    /// Events still queued (due after the deadline)
    pub events_pending: usize,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Events processed per second
    pub events_per_second: f64,
}

impl SimulationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simulation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;
        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.events_per_second = self.engine.events_dispatched as f64 / seconds;
        }
    }

    /// Mean delay of loop `index` of application `app_id`.
    pub fn loop_average(&self, app_id: &str, index: usize) -> Option<f64> {
        self.latency
            .loops
            .get(&format!("{}#{}", app_id, index))
            .and_then(|r| r.value())
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
