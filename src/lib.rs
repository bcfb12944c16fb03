//! # fogloop
//!
//! Module placement and control-loop latency measurement for fog/edge
//! applications.
//!
//! An application is a dataflow graph of processing modules fed by sensors
//! and driving actuators. It is placed onto a tree of compute devices (cloud
//! root, intermediate gateways, edge devices) and its traffic is replayed on
//! a discrete-event queue to measure how long each control loop takes end to
//! end.
//!
//! ## Components
//!
//! - [`application`]: modules, edges, selectivity mappings, control loops
//! - [`device`]: the device tree with sensors and actuators, link delays
//! - [`placement`]: explicit and edge-ward module placement
//! - [`router`]: tuple routing, device service queues, anomaly counting
//! - [`tracker`]: running-mean loop latency and per-type CPU time
//! - [`engine`]: the [`FogSimulation`] driver tying them together
//! - [`config`]: YAML/JSON scenario files
//!
//! ## Quick Start
//!
//! ```rust
//! use fogloop::application::{AppEdge, Application, ControlLoop, Direction, EdgeKind, Selectivity};
//! use fogloop::device::{DeviceHierarchy, FogDeviceSpec};
//! use fogloop::placement::PlacementPolicy;
//! use fogloop::FogSimulation;
//!
//! let mut hierarchy = DeviceHierarchy::new();
//! let cloud = hierarchy.add_device(FogDeviceSpec::new("cloud", 44800.0, 40000, 100.0, 10000.0), None).unwrap();
//! let phone = hierarchy
//!     .add_device(FogDeviceSpec::new("phone", 1000.0, 1000, 10000.0, 270.0).with_uplink_latency(2.0), Some(cloud))
//!     .unwrap();
//! let sensor = hierarchy.add_sensor("bp-0", "BP", "monitor", phone, 1.0, None).unwrap();
//! hierarchy.add_actuator("display-0", "DISPLAY", "monitor", phone, 1.0).unwrap();
//!
//! let mut app = Application::new("monitor");
//! app.add_module("client", 100.0, 10, 100.0).unwrap();
//! app.add_edge(AppEdge::new("BP", "client", "BP", Direction::Up, EdgeKind::Sensor, 1000.0, 500.0));
//! app.add_edge(AppEdge::new("client", "DISPLAY", "SHOW", Direction::Actuator, EdgeKind::Actuator, 0.0, 100.0));
//! app.add_tuple_mapping("client", "BP", "SHOW", Selectivity::one_to_one()).unwrap();
//! app.set_loops(vec![ControlLoop::new(["BP", "client", "DISPLAY"])]);
//!
//! let mut sim = FogSimulation::new(hierarchy, 1000.0);
//! sim.submit_application(app, &PlacementPolicy::edge_ward()).unwrap();
//! sim.inject_sensor_emission(sensor, 0.0).unwrap();
//! let stats = sim.run();
//!
//! // sensor link 1 + processing 1 + actuator link 1
//! assert_eq!(stats.loop_average("monitor", 0), Some(3.0));
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use fogloop::config::ScenarioConfig;
//!
//! let config = ScenarioConfig::from_file("scenario.yaml")?;
//! let stats = config.build()?.run();
//! ```

pub mod types;
pub mod error;
pub mod application;
pub mod device;
pub mod placement;
pub mod tuple;
pub mod event;
pub mod queue;
pub mod listener;
pub mod router;
pub mod tracker;
pub mod engine;
pub mod config;
pub mod stats;

// Re-export commonly used types
pub use types::{DeviceId, EntityId, SimTime, TupleId};
pub use error::{FogError, FogResult};
pub use application::{AppEdge, AppModule, Application, ControlLoop, Direction, EdgeKind, LoopId, Selectivity, TupleMapping};
pub use device::{Actuator, DeviceHierarchy, FogDevice, FogDeviceSpec, Sensor};
pub use placement::{CommittedDemand, ModuleMapping, PlacementPolicy, PlacementResolver, PlacementTable};
pub use tuple::{Hop, Tuple};
pub use event::{Event, EventPayload};
pub use queue::{EventQueue, Scheduler};
pub use listener::TupleListener;
pub use router::{DeviceUsage, RouterCounters, RoutingContext, TupleRouter};
pub use tracker::{LatencySnapshot, LatencyTracker, RunningMean};
pub use engine::FogSimulation;
pub use config::{ConfigError, ScenarioConfig};
pub use stats::{SimulationStats, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// fogloop::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
