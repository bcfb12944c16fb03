//! Simulation driver.
//!
//! [`FogSimulation`] owns one run: the device hierarchy, the event queue, the
//! latency tracker and the router. Applications are submitted (validated and
//! placed) before the run starts, so every topology or placement error
//! surfaces before the first event is dispatched. Applications share the
//! capacity of the hierarchy: each placement is committed and counted
//! against the next edge-ward resolution.

use std::collections::BTreeMap;

use crate::application::{Application, LoopId};
use crate::device::DeviceHierarchy;
use crate::error::{FogError, FogResult};
use crate::event::EventPayload;
use crate::listener::TupleListener;
use crate::placement::{CommittedDemand, PlacementPolicy, PlacementResolver, PlacementTable};
use crate::queue::{EventQueue, Scheduler};
use crate::router::{RouterCounters, RoutingContext, TupleRouter};
use crate::stats::{SimulationStats, Timer};
use crate::tracker::LatencyTracker;
use crate::types::{EntityId, SimTime};

/// One simulation run over a fixed device hierarchy.
///
/// # Example
///
/// ```
/// use fogloop::application::{AppEdge, Application, Direction, EdgeKind};
/// use fogloop::device::{DeviceHierarchy, FogDeviceSpec};
/// use fogloop::engine::FogSimulation;
/// use fogloop::placement::PlacementPolicy;
///
/// let mut hierarchy = DeviceHierarchy::new();
/// let cloud = hierarchy.add_device(FogDeviceSpec::new("cloud", 1000.0, 1000, 100.0, 100.0), None).unwrap();
/// hierarchy.add_sensor("s-0", "S", "app", cloud, 0.0, Some(10.0)).unwrap();
///
/// let mut app = Application::new("app");
/// app.add_module("m", 100.0, 10, 10.0).unwrap();
/// app.add_edge(AppEdge::new("S", "m", "S", Direction::Up, EdgeKind::Sensor, 100.0, 10.0));
///
/// let mut sim = FogSimulation::new(hierarchy, 105.0);
/// sim.submit_application(app, &PlacementPolicy::edge_ward()).unwrap();
/// let stats = sim.run();
/// assert_eq!(stats.routing.tuples_executed, 10);
/// ```
pub struct FogSimulation {
    name: String,
    hierarchy: DeviceHierarchy,
    queue: EventQueue,
    tracker: LatencyTracker,
    router: TupleRouter,
    committed: CommittedDemand,
    initialized: bool,
}

impl FogSimulation {
    /// Creates a run that never dispatches events after `max_time`.
    pub fn new(hierarchy: DeviceHierarchy, max_time: SimTime) -> Self {
        Self {
            name: String::new(),
            hierarchy,
            queue: EventQueue::new(max_time),
            tracker: LatencyTracker::new(),
            router: TupleRouter::new(),
            committed: CommittedDemand::new(),
            initialized: false,
        }
    }

    /// Sets the name reported in statistics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Validates `app`, resolves its placement and registers it for routing.
    ///
    /// Returns the resolved placement. Fails once the run has been
    /// initialised.
    pub fn submit_application(&mut self, app: Application, policy: &PlacementPolicy) -> FogResult<PlacementTable> {
        if self.initialized {
            return Err(FogError::SubmittedAfterStart(app.app_id));
        }
        if self.router.application(&app.app_id).is_some() {
            return Err(FogError::DuplicateApplication(app.app_id));
        }
        app.validate()?;
        let placement = PlacementResolver::new(&app, &self.hierarchy)
            .with_committed(&self.committed)
            .resolve(policy)?;

        tracing::info!(
            app = %app.app_id,
            modules = placement.len(),
            loops = app.loops().len(),
            "application submitted"
        );
        let mut committed = self.committed.clone();
        committed.commit(&app, &placement);
        self.router.deploy(app, placement.clone())?;
        self.committed = committed;
        Ok(placement)
    }

    /// Attaches a listener to a module of a submitted application.
    pub fn register_listener(
        &mut self,
        app_id: &str,
        module: &str,
        listener: Box<dyn TupleListener>,
    ) -> FogResult<()> {
        if self.router.application(app_id).is_none() {
            return Err(FogError::UnknownApplication(app_id.to_string()));
        }
        self.router.register_listener(app_id, module, listener);
        Ok(())
    }

    /// Schedules a single emission of `sensor` at absolute time `at`.
    pub fn inject_sensor_emission(&mut self, sensor: EntityId, at: SimTime) -> FogResult<()> {
        if self.hierarchy.sensor(sensor).is_none() {
            return Err(FogError::UnknownDevice(format!("sensor {}", sensor)));
        }
        self.queue.schedule_at(sensor, EventPayload::SensorEmit, at);
        Ok(())
    }

    /// Seeds periodic sensors and periodic edges, each firing first after one
    /// period. Called by [`step`](Self::step) if not called explicitly.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let periodic_sensors: Vec<(EntityId, SimTime)> = self
            .hierarchy
            .sensors()
            .iter()
            .filter_map(|s| s.interval.filter(|i| *i > 0.0).map(|i| (s.id, i)))
            .collect();
        for (sensor, interval) in periodic_sensors {
            self.queue.schedule(sensor, EventPayload::SensorTick, interval);
        }

        for source in self.router.periodic_sources() {
            self.queue.schedule(
                source.device,
                EventPayload::PeriodicEmit {
                    app_id: source.app_id,
                    edge: source.edge,
                },
                source.period,
            );
        }

        tracing::info!(
            devices = self.hierarchy.len(),
            sensors = self.hierarchy.sensors().len(),
            actuators = self.hierarchy.actuators().len(),
            seeded = self.queue.len(),
            max_time = self.queue.max_time(),
            "simulation initialised"
        );
    }

    /// Dispatches the next event. Returns false once the queue is drained or
    /// the next event lies beyond the deadline.
    pub fn step(&mut self) -> bool {
        self.init();
        let Some(event) = self.queue.pop() else {
            return false;
        };
        let mut ctx = RoutingContext {
            hierarchy: &self.hierarchy,
            scheduler: &mut self.queue,
            tracker: &mut self.tracker,
        };
        self.router.handle(event, &mut ctx);
        true
    }

    /// Runs until the queue is drained or the deadline is reached.
    pub fn run(&mut self) -> SimulationStats {
        let timer = Timer::start();
        while self.step() {}

        let mut stats = self.stats();
        stats.compute_timing(timer.elapsed_ms());

        let counters = self.router.counters();
        tracing::info!(
            final_time = self.queue.now(),
            events = self.queue.dispatched(),
            executed = counters.tuples_executed,
            unrouted = counters.unrouted_tuples,
            wall_ms = stats.timing.total_wall_time_ms,
            "simulation finished"
        );
        for (loop_id, average) in self.tracker.loop_averages() {
            tracing::info!(loop_id = %loop_id, average, "control loop latency");
        }
        stats
    }

    /// Snapshot of everything measured so far.
    pub fn stats(&self) -> SimulationStats {
        let mut stats = SimulationStats::new().with_name(self.name.clone());
        stats.metadata.version = env!("CARGO_PKG_VERSION").to_string();
        stats.engine.final_time = self.queue.now();
        stats.engine.max_time = self.queue.max_time();
        stats.engine.events_dispatched = self.queue.dispatched();
        stats.engine.events_pending = self.queue.len();
        stats.routing = self.router.counters().clone();
        stats.latency = self.tracker.snapshot();
        stats.devices = self
            .hierarchy
            .devices()
            .iter()
            .map(|d| (d.name.clone(), self.router.device_usage(d.id)))
            .collect();

        for app in self.router.applications() {
            let Some(placement) = self.router.placement(&app.app_id) else {
                continue;
            };
            let modules: BTreeMap<String, String> = placement
                .iter()
                .map(|(module, &device)| {
                    let name = self
                        .hierarchy
                        .device(device)
                        .map(|d| d.name.clone())
                        .unwrap_or_else(|| device.to_string());
                    (module.clone(), name)
                })
                .collect();
            stats.placements.insert(app.app_id.clone(), modules);
        }
        stats
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn max_time(&self) -> SimTime {
        self.queue.max_time()
    }

    pub fn hierarchy(&self) -> &DeviceHierarchy {
        &self.hierarchy
    }

    pub fn tracker(&self) -> &LatencyTracker {
        &self.tracker
    }

    pub fn counters(&self) -> &RouterCounters {
        self.router.counters()
    }

    pub fn router(&self) -> &TupleRouter {
        &self.router
    }

    pub fn placement(&self, app_id: &str) -> Option<&PlacementTable> {
        self.router.placement(app_id)
    }

    /// Demand of all submitted applications, per device.
    pub fn committed(&self) -> &CommittedDemand {
        &self.committed
    }

    /// Mean delay of loop `index` of application `app_id`.
    pub fn loop_average(&self, app_id: &str, index: usize) -> Option<f64> {
        self.tracker.loop_average(&LoopId::new(app_id, index))
    }

    /// Number of events waiting in the queue.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}
