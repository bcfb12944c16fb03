//! Application topology: modules, edges, selectivity rules and control loops.
//!
//! An [`Application`] is the static description of a dataflow graph. It is
//! built once by the driver, validated with [`Application::validate`], and is
//! read-only after it has been submitted to a simulation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{FogError, FogResult};
use crate::types::SimTime;

/// A named processing unit with resource demands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppModule {
    /// Module name, unique within the application
    pub name: String,
    /// Processing-rate requirement
    pub mips: f64,
    /// Memory requirement
    pub ram: u64,
    /// Bandwidth requirement
    pub bw: f64,
    /// State size
    #[serde(default)]
    pub size: u64,
}

/// Direction a tuple travels along an edge relative to the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards the cloud root
    Up,
    /// Towards the leaves
    Down,
    /// Towards an actuator
    Actuator,
}

/// Whether the endpoints of an edge are modules or boundary endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Module to module
    Module,
    /// Source is a sensor tuple type, destination is a module
    Sensor,
    /// Source is a module, destination is an actuator type
    Actuator,
}

/// A directed data dependency carrying one tuple type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppEdge {
    pub source: String,
    pub destination: String,
    pub tuple_type: String,
    pub direction: Direction,
    pub kind: EdgeKind,
    /// Processing cost charged to the destination module
    pub cpu_length: f64,
    /// Payload size used with link bandwidth for transmission delay
    pub network_length: f64,
    /// Maximum acceptable delivery delay, measured from tuple creation
    #[serde(default)]
    pub deadline: Option<SimTime>,
    /// When set, the source module emits a tuple on this edge every period
    #[serde(default)]
    pub periodicity: Option<SimTime>,
}

impl AppEdge {
    /// Creates a new edge with no deadline and no periodicity.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        tuple_type: impl Into<String>,
        direction: Direction,
        kind: EdgeKind,
        cpu_length: f64,
        network_length: f64,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            tuple_type: tuple_type.into(),
            direction,
            kind,
            cpu_length,
            network_length,
            deadline: None,
            periodicity: None,
        }
    }

    /// Sets a delivery deadline.
    pub fn with_deadline(mut self, deadline: SimTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Makes the edge periodic.
    pub fn with_periodicity(mut self, period: SimTime) -> Self {
        self.periodicity = Some(period);
        self
    }

    /// Returns true if the destination is a processing module.
    pub fn targets_module(&self) -> bool {
        self.kind != EdgeKind::Actuator
    }

    /// Returns true if the source is a processing module.
    pub fn sourced_by_module(&self) -> bool {
        self.kind != EdgeKind::Sensor
    }
}

impl fmt::Display for AppEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.source, self.destination, self.tuple_type)
    }
}

/// Emission rule of a selectivity mapping.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selectivity {
    /// Emit `fraction` output tuples per input tuple on average.
    ///
    /// `1.0` is the deterministic 1-to-1 rule, values above one fan out and
    /// values below one filter.
    Fractional(f64),
}

impl Selectivity {
    /// The deterministic 1-to-1 rule.
    pub fn one_to_one() -> Self {
        Selectivity::Fractional(1.0)
    }

    /// Average number of output tuples per input tuple.
    pub fn fraction(&self) -> f64 {
        match self {
            Selectivity::Fractional(f) => *f,
        }
    }
}

/// Maps an incoming tuple type at a module to an outgoing tuple type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TupleMapping {
    pub module: String,
    pub input_type: String,
    pub output_type: String,
    pub selectivity: Selectivity,
}

/// An ordered sequence of node names whose end-to-end delay is tracked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlLoop {
    pub modules: Vec<String>,
}

impl ControlLoop {
    pub fn new<S: Into<String>>(modules: impl IntoIterator<Item = S>) -> Self {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Identity of a control loop: the owning application and its position in
/// the application's loop list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId {
    pub app_id: String,
    pub index: usize,
}

impl LoopId {
    pub fn new(app_id: impl Into<String>, index: usize) -> Self {
        Self {
            app_id: app_id.into(),
            index,
        }
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.app_id, self.index)
    }
}

/// The static description of an application's dataflow graph.
///
/// # Example
///
/// ```
/// use fogloop::application::{Application, AppEdge, ControlLoop, Direction, EdgeKind, Selectivity};
///
/// let mut app = Application::new("monitor");
/// app.add_module("client", 100.0, 10, 100.0).unwrap();
/// app.add_edge(AppEdge::new("BP", "client", "BP", Direction::Up, EdgeKind::Sensor, 1000.0, 500.0));
/// app.add_edge(AppEdge::new("client", "DISPLAY", "SHOW", Direction::Actuator, EdgeKind::Actuator, 0.0, 100.0));
/// app.add_tuple_mapping("client", "BP", "SHOW", Selectivity::one_to_one()).unwrap();
/// app.set_loops(vec![ControlLoop::new(["BP", "client", "DISPLAY"])]);
///
/// assert!(app.validate().is_ok());
/// ```
///
/// Only the builder methods construct an application, so their duplicate
/// and mapping checks always hold. Scenario files go through
/// [`ApplicationConfig`](crate::config::ApplicationConfig).
#[derive(Clone, Debug, Default, Serialize)]
pub struct Application {
    pub app_id: String,
    modules: Vec<AppModule>,
    edges: Vec<AppEdge>,
    mappings: Vec<TupleMapping>,
    loops: Vec<ControlLoop>,
}

impl Application {
    /// Creates an empty application.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    /// Adds a module with zero state size.
    pub fn add_module(&mut self, name: impl Into<String>, mips: f64, ram: u64, bw: f64) -> FogResult<()> {
        self.add_module_with_size(name, mips, ram, bw, 0)
    }

    /// Adds a module.
    ///
    /// Fails with [`FogError::DuplicateModule`] if the name is already used.
    pub fn add_module_with_size(
        &mut self,
        name: impl Into<String>,
        mips: f64,
        ram: u64,
        bw: f64,
        size: u64,
    ) -> FogResult<()> {
        let name = name.into();
        if self.module(&name).is_some() {
            return Err(FogError::DuplicateModule {
                app_id: self.app_id.clone(),
                module: name,
            });
        }
        self.modules.push(AppModule {
            name,
            mips,
            ram,
            bw,
            size,
        });
        Ok(())
    }

    /// Adds an edge. Edges are checked by [`validate`](Self::validate).
    pub fn add_edge(&mut self, edge: AppEdge) {
        self.edges.push(edge);
    }

    /// Adds a selectivity mapping `input_type -> output_type` at `module`.
    pub fn add_tuple_mapping(
        &mut self,
        module: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
        selectivity: Selectivity,
    ) -> FogResult<()> {
        let mapping = TupleMapping {
            module: module.into(),
            input_type: input_type.into(),
            output_type: output_type.into(),
            selectivity,
        };
        let fraction = selectivity.fraction();
        if !fraction.is_finite() || fraction < 0.0 {
            return Err(FogError::InvalidSelectivity {
                module: mapping.module,
                input_type: mapping.input_type,
                output_type: mapping.output_type,
                fraction,
            });
        }
        self.mappings.push(mapping);
        Ok(())
    }

    /// Replaces the application's control loops.
    pub fn set_loops(&mut self, loops: Vec<ControlLoop>) {
        self.loops = loops;
    }

    pub fn modules(&self) -> &[AppModule] {
        &self.modules
    }

    pub fn edges(&self) -> &[AppEdge] {
        &self.edges
    }

    pub fn mappings(&self) -> &[TupleMapping] {
        &self.mappings
    }

    pub fn loops(&self) -> &[ControlLoop] {
        &self.loops
    }

    /// Returns the identity of the loop at `index`.
    pub fn loop_id(&self, index: usize) -> LoopId {
        LoopId::new(self.app_id.clone(), index)
    }

    /// Length of the longest control loop (at least one).
    pub fn max_loop_len(&self) -> usize {
        self.loops.iter().map(ControlLoop::len).max().unwrap_or(0).max(1)
    }

    pub fn module(&self, name: &str) -> Option<&AppModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    /// Edges leaving `source` that carry `tuple_type`.
    pub fn edges_from<'a>(&'a self, source: &'a str, tuple_type: &'a str) -> impl Iterator<Item = &'a AppEdge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.source == source && e.tuple_type == tuple_type)
    }

    /// Mappings at `module` triggered by `input_type`, with their indices.
    pub fn mappings_for<'a>(
        &'a self,
        module: &'a str,
        input_type: &'a str,
    ) -> impl Iterator<Item = (usize, &'a TupleMapping)> + 'a {
        self.mappings
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.module == module && m.input_type == input_type)
    }

    /// Modules referenced by at least one edge, in declaration order.
    pub fn edge_modules(&self) -> Vec<&AppModule> {
        self.modules
            .iter()
            .filter(|m| {
                self.edges.iter().any(|e| {
                    (e.sourced_by_module() && e.source == m.name)
                        || (e.targets_module() && e.destination == m.name)
                })
            })
            .collect()
    }

    fn has_outgoing_edges(&self, module: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.sourced_by_module() && e.source == module)
    }

    fn dangling(&self, edge: &AppEdge, reason: impl Into<String>) -> FogError {
        FogError::DanglingEdge {
            app_id: self.app_id.clone(),
            source_node: edge.source.clone(),
            destination: edge.destination.clone(),
            tuple_type: edge.tuple_type.clone(),
            reason: reason.into(),
        }
    }

    /// Validates the topology.
    ///
    /// Must succeed before the application is placed or routed.
    pub fn validate(&self) -> FogResult<()> {
        for edge in &self.edges {
            if edge.sourced_by_module() && !self.has_module(&edge.source) {
                return Err(self.dangling(edge, "source module is not declared"));
            }
            if edge.targets_module() && !self.has_module(&edge.destination) {
                return Err(self.dangling(edge, "destination module is not declared"));
            }

            // Sink modules pass validation; their unmapped inputs are counted
            // as unrouted at run time.
            if edge.targets_module()
                && self.has_outgoing_edges(&edge.destination)
                && self
                    .mappings_for(&edge.destination, &edge.tuple_type)
                    .next()
                    .is_none()
            {
                return Err(self.dangling(
                    edge,
                    format!(
                        "module '{}' has no selectivity mapping for input '{}'",
                        edge.destination, edge.tuple_type
                    ),
                ));
            }
        }

        for (index, control_loop) in self.loops.iter().enumerate() {
            for pair in control_loop.modules.windows(2) {
                let (from, to) = (&pair[0], &pair[1]);
                let joined = self.edges.iter().any(|e| {
                    (&e.source == from && &e.destination == to)
                        || (&e.source == to && &e.destination == from)
                });
                if !joined {
                    return Err(FogError::InvalidControlLoop {
                        app_id: self.app_id.clone(),
                        index,
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        let declared: HashSet<&str> = self.modules.iter().map(|m| m.name.as_str()).collect();
        for mapping in &self.mappings {
            if !declared.contains(mapping.module.as_str()) {
                tracing::warn!(
                    app = %self.app_id,
                    module = %mapping.module,
                    "selectivity mapping references an undeclared module (ignored)"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypotension_app() -> Application {
        let mut app = Application::new("hypotension");
        app.add_module("clientModule", 1000.0, 10, 1000.0).unwrap();
        app.add_module("hypotensionDetector", 1000.0, 50, 1000.0).unwrap();

        app.add_edge(AppEdge::new("BP_SENSOR", "clientModule", "BP_SENSOR", Direction::Up, EdgeKind::Sensor, 1000.0, 500.0));
        app.add_edge(AppEdge::new("clientModule", "hypotensionDetector", "RAW_BP_DATA", Direction::Up, EdgeKind::Module, 2000.0, 500.0));
        app.add_edge(AppEdge::new("hypotensionDetector", "clientModule", "PROCESSED_DATA", Direction::Down, EdgeKind::Module, 28.0, 1000.0));
        app.add_edge(AppEdge::new("clientModule", "DISPLAY", "DISPLAY_UPDATE", Direction::Actuator, EdgeKind::Actuator, 500.0, 500.0));

        app.add_tuple_mapping("clientModule", "BP_SENSOR", "RAW_BP_DATA", Selectivity::one_to_one()).unwrap();
        app.add_tuple_mapping("hypotensionDetector", "RAW_BP_DATA", "PROCESSED_DATA", Selectivity::one_to_one()).unwrap();
        app.add_tuple_mapping("clientModule", "PROCESSED_DATA", "DISPLAY_UPDATE", Selectivity::one_to_one()).unwrap();

        app.set_loops(vec![ControlLoop::new([
            "BP_SENSOR",
            "clientModule",
            "hypotensionDetector",
            "clientModule",
            "DISPLAY",
        ])]);
        app
    }

    #[test]
    fn test_valid_application() {
        let app = hypotension_app();
        assert!(app.validate().is_ok());
        assert_eq!(app.modules().len(), 2);
        assert_eq!(app.edges().len(), 4);
        assert_eq!(app.max_loop_len(), 5);
    }

    #[test]
    fn test_duplicate_module() {
        let mut app = Application::new("a");
        app.add_module("m", 100.0, 1, 1.0).unwrap();
        let err = app.add_module("m", 200.0, 2, 2.0).unwrap_err();
        assert!(matches!(err, FogError::DuplicateModule { .. }));
        assert_eq!(app.modules().len(), 1);
    }

    #[test]
    fn test_negative_selectivity_rejected() {
        let mut app = Application::new("a");
        let err = app
            .add_tuple_mapping("m", "X", "Y", Selectivity::Fractional(-0.5))
            .unwrap_err();
        assert!(matches!(err, FogError::InvalidSelectivity { .. }));
        assert!(app.mappings().is_empty());
    }

    #[test]
    fn test_zero_selectivity_is_legal() {
        let mut app = Application::new("a");
        assert!(app
            .add_tuple_mapping("m", "X", "Y", Selectivity::Fractional(0.0))
            .is_ok());
    }

    #[test]
    fn test_dangling_edge_missing_mapping() {
        let mut app = hypotension_app();
        // Rebuild without the detector's continuation.
        app.mappings.retain(|m| m.module != "hypotensionDetector");
        let err = app.validate().unwrap_err();
        match err {
            FogError::DanglingEdge { destination, tuple_type, .. } => {
                assert_eq!(destination, "hypotensionDetector");
                assert_eq!(tuple_type, "RAW_BP_DATA");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dangling_edge_undeclared_module() {
        let mut app = Application::new("a");
        app.add_module("m", 100.0, 1, 1.0).unwrap();
        app.add_edge(AppEdge::new("m", "ghost", "X", Direction::Up, EdgeKind::Module, 1.0, 1.0));
        assert!(matches!(app.validate(), Err(FogError::DanglingEdge { .. })));
    }

    #[test]
    fn test_sink_module_needs_no_mapping() {
        let mut app = Application::new("a");
        app.add_module("sink", 100.0, 1, 1.0).unwrap();
        app.add_edge(AppEdge::new("S", "sink", "S", Direction::Up, EdgeKind::Sensor, 1.0, 1.0));
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_actuator_destination_exempt() {
        let mut app = Application::new("a");
        app.add_module("m", 100.0, 1, 1.0).unwrap();
        app.add_edge(AppEdge::new("m", "LAMP", "ON", Direction::Actuator, EdgeKind::Actuator, 0.0, 1.0));
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_invalid_loop() {
        let mut app = hypotension_app();
        app.set_loops(vec![ControlLoop::new(["BP_SENSOR", "hypotensionDetector"])]);
        let err = app.validate().unwrap_err();
        assert!(matches!(err, FogError::InvalidControlLoop { index: 0, .. }));
    }

    #[test]
    fn test_loop_ignores_edge_direction() {
        let mut app = hypotension_app();
        app.set_loops(vec![ControlLoop::new(["hypotensionDetector", "clientModule", "BP_SENSOR"])]);
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_edge_modules_and_lookups() {
        let mut app = hypotension_app();
        app.add_module("unused", 1.0, 1, 1.0).unwrap();

        let names: Vec<_> = app.edge_modules().iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["clientModule", "hypotensionDetector"]);

        assert_eq!(app.edges_from("clientModule", "RAW_BP_DATA").count(), 1);
        assert_eq!(app.mappings_for("clientModule", "PROCESSED_DATA").count(), 1);
        assert_eq!(app.loop_id(0), LoopId::new("hypotension", 0));
    }

    #[test]
    fn test_application_serialization() {
        let app = hypotension_app();
        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["app_id"], "hypotension");
        assert_eq!(value["modules"].as_array().unwrap().len(), 2);
        assert_eq!(value["edges"].as_array().unwrap().len(), app.edges().len());
        assert_eq!(value["modules"][0]["name"], "clientModule");
    }
}
