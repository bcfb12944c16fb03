//! Tuple routing over placed applications.
//!
//! The [`TupleRouter`] reacts to one event at a time. It owns the runtime
//! state that changes during a run (per-device service queues, selectivity
//! credit, counters) while the static inputs (hierarchy, applications,
//! placements) are only read.
//!
//! # Lifecycle
//!
//! 1. A sensor emission creates one tuple per edge leaving the sensor's tuple
//!    type and sends it to the device hosting the edge's destination module.
//! 2. On arrival the module's name is appended to the tuple's provenance. The
//!    tuple starts executing if the device is idle, otherwise it waits in the
//!    device's FIFO queue.
//! 3. On completion every selectivity mapping for the input type releases
//!    zero or more output tuples, which travel along every edge carrying the
//!    output type: to another module, or to the matching actuators.
//! 4. Control loops are closed when the trailing provenance of a tuple equals
//!    the loop sequence, either at module completion or at actuator arrival.
//!
//! Anything that cannot be routed is dropped and counted; routing never fails
//! the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::application::{AppEdge, Application, EdgeKind};
use crate::device::{Actuator, DeviceHierarchy};
use crate::error::{FogError, FogResult};
use crate::event::{Event, EventPayload};
use crate::listener::TupleListener;
use crate::placement::PlacementTable;
use crate::queue::Scheduler;
use crate::tracker::LatencyTracker;
use crate::tuple::Tuple;
use crate::types::{DeviceId, EntityId, SimTime, TupleId};

/// Tolerance applied before flooring accumulated selectivity credit.
const CREDIT_EPSILON: f64 = 1e-9;

/// Everything the router borrows while handling one event.
pub struct RoutingContext<'a> {
    pub hierarchy: &'a DeviceHierarchy,
    pub scheduler: &'a mut dyn Scheduler,
    pub tracker: &'a mut LatencyTracker,
}

/// Run-wide routing counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterCounters {
    pub tuples_created: u64,
    pub tuples_executed: u64,
    /// Tuples dropped because no edge, placement or endpoint could take them
    pub unrouted_tuples: u64,
    /// Sum of `network_length * links crossed` over every transmission
    pub network_bytes: f64,
    pub deadline_misses: u64,
    pub actuator_deliveries: u64,
}

/// Work done by one device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub executed: u64,
    pub busy_time: SimTime,
}

/// A periodic edge ready to be seeded on the device hosting its source.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodicSource {
    pub device: DeviceId,
    pub app_id: String,
    pub edge: usize,
    pub period: SimTime,
}

#[derive(Debug, Default)]
struct DeviceRuntime {
    /// Start time of the tuple in service, if any
    running: Option<SimTime>,
    queue: VecDeque<Tuple>,
    usage: DeviceUsage,
}

#[derive(Debug)]
struct Deployment {
    app: Application,
    placement: PlacementTable,
    /// Selectivity credit, indexed like `app.mappings()`
    credit: Vec<f64>,
}

type ListenerMap = HashMap<String, HashMap<String, Vec<Box<dyn TupleListener>>>>;

/// Routes tuples through every deployed application.
#[derive(Default)]
pub struct TupleRouter {
    deployments: BTreeMap<String, Deployment>,
    devices: HashMap<DeviceId, DeviceRuntime>,
    listeners: ListenerMap,
    counters: RouterCounters,
    next_tuple_id: TupleId,
}

impl TupleRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a validated application together with its resolved placement.
    pub fn deploy(&mut self, app: Application, placement: PlacementTable) -> FogResult<()> {
        if self.deployments.contains_key(&app.app_id) {
            return Err(FogError::DuplicateApplication(app.app_id));
        }
        let credit = vec![0.0; app.mappings().len()];
        self.deployments.insert(
            app.app_id.clone(),
            Deployment {
                app,
                placement,
                credit,
            },
        );
        Ok(())
    }

    /// Attaches a listener to `module` of application `app_id`.
    pub fn register_listener(
        &mut self,
        app_id: impl Into<String>,
        module: impl Into<String>,
        listener: Box<dyn TupleListener>,
    ) {
        self.listeners
            .entry(app_id.into())
            .or_default()
            .entry(module.into())
            .or_default()
            .push(listener);
    }

    pub fn application(&self, app_id: &str) -> Option<&Application> {
        self.deployments.get(app_id).map(|d| &d.app)
    }

    pub fn placement(&self, app_id: &str) -> Option<&PlacementTable> {
        self.deployments.get(app_id).map(|d| &d.placement)
    }

    /// Deployed applications in id order.
    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        self.deployments.values().map(|d| &d.app)
    }

    pub fn counters(&self) -> &RouterCounters {
        &self.counters
    }

    pub fn device_usage(&self, device: DeviceId) -> DeviceUsage {
        self.devices
            .get(&device)
            .map(|r| r.usage)
            .unwrap_or_default()
    }

    /// Number of tuples waiting (not in service) on `device`.
    pub fn queue_len(&self, device: DeviceId) -> usize {
        self.devices.get(&device).map(|r| r.queue.len()).unwrap_or(0)
    }

    /// Periodic module edges of every deployment, with the hosting device.
    pub fn periodic_sources(&self) -> Vec<PeriodicSource> {
        let mut sources = Vec::new();
        for deployment in self.deployments.values() {
            for (index, edge) in deployment.app.edges().iter().enumerate() {
                let Some(period) = edge.periodicity.filter(|p| *p > 0.0) else {
                    continue;
                };
                if !edge.sourced_by_module() {
                    continue;
                }
                if let Some(device) = deployment.placement.device_of(&edge.source) {
                    sources.push(PeriodicSource {
                        device,
                        app_id: deployment.app.app_id.clone(),
                        edge: index,
                        period,
                    });
                }
            }
        }
        sources
    }

    /// Processes one event.
    pub fn handle(&mut self, event: Event, ctx: &mut RoutingContext<'_>) {
        tracing::trace!(time = event.time, target = event.target, kind = event.payload.kind(), "event");
        match event.payload {
            EventPayload::SensorEmit => self.emit_from_sensor(event.target, ctx),
            EventPayload::SensorTick => {
                self.emit_from_sensor(event.target, ctx);
                let interval = ctx
                    .hierarchy
                    .sensor(event.target)
                    .and_then(|s| s.interval)
                    .filter(|i| *i > 0.0);
                if let Some(interval) = interval {
                    ctx.scheduler
                        .schedule(event.target, EventPayload::SensorTick, interval);
                }
            }
            EventPayload::TupleArrival(tuple) => self.arrive(event.target, tuple, ctx),
            EventPayload::ExecutionDone(tuple) => self.complete(event.target, tuple, ctx),
            EventPayload::ActuatorArrival(tuple) => self.deliver_to_actuator(event.target, tuple, ctx),
            EventPayload::PeriodicEmit { app_id, edge } => {
                self.emit_periodic(event.target, &app_id, edge, ctx)
            }
        }
    }

    fn unrouted(&mut self, app_id: &str, tuple_type: &str, reason: &str) {
        self.counters.unrouted_tuples += 1;
        tracing::warn!(app = %app_id, tuple_type = %tuple_type, reason, "unrouted tuple dropped");
    }

    fn loop_limit(&self, app_id: &str) -> usize {
        self.deployments
            .get(app_id)
            .map(|d| d.app.max_loop_len())
            .unwrap_or(1)
    }

    fn device_of(&self, app_id: &str, module: &str) -> Option<DeviceId> {
        self.deployments
            .get(app_id)
            .and_then(|d| d.placement.device_of(module))
    }

    fn edges_from(&self, app_id: &str, source: &str, tuple_type: &str) -> Vec<AppEdge> {
        self.deployments
            .get(app_id)
            .map(|d| d.app.edges_from(source, tuple_type).cloned().collect())
            .unwrap_or_default()
    }

    fn new_tuple(
        &mut self,
        app_id: &str,
        edge: &AppEdge,
        src: String,
        origin: Option<EntityId>,
        now: SimTime,
        tracker: &mut LatencyTracker,
    ) -> Tuple {
        let tuple = Tuple {
            id: self.next_tuple_id,
            app_id: app_id.to_string(),
            tuple_type: edge.tuple_type.clone(),
            src,
            dst: edge.destination.clone(),
            direction: edge.direction,
            cpu_length: edge.cpu_length,
            network_length: edge.network_length,
            origin,
            created_at: now,
            deadline: edge.deadline,
            provenance: Vec::new(),
        };
        self.next_tuple_id += 1;
        self.counters.tuples_created += 1;
        tracker.on_tuple_created(&tuple, now);
        tuple
    }

    /// Link delay between two devices, charging the payload to every link.
    fn transmit(
        &mut self,
        hierarchy: &DeviceHierarchy,
        from: DeviceId,
        to: DeviceId,
        network_length: f64,
    ) -> Option<SimTime> {
        let hops = hierarchy.route(from, to)?.hops();
        let delay = hierarchy.transfer_delay(from, to, network_length)?;
        self.counters.network_bytes += network_length * hops as f64;
        Some(delay)
    }

    fn check_deadline(&mut self, tuple: &Tuple, now: SimTime, tracker: &mut LatencyTracker) {
        if tuple.missed_deadline(now) {
            self.counters.deadline_misses += 1;
            tracker.on_deadline_miss(tuple);
            tracing::debug!(
                tuple = tuple.id,
                tuple_type = %tuple.tuple_type,
                age = now - tuple.created_at,
                "deadline missed"
            );
        }
    }

    fn emit_from_sensor(&mut self, sensor_id: EntityId, ctx: &mut RoutingContext<'_>) {
        let hierarchy = ctx.hierarchy;
        let Some(sensor) = hierarchy.sensor(sensor_id) else {
            tracing::warn!(sensor = sensor_id, "emission from unknown sensor ignored");
            return;
        };
        let now = ctx.scheduler.now();

        let edges: Vec<AppEdge> = self
            .deployments
            .get(&sensor.app_id)
            .map(|d| {
                d.app
                    .edges()
                    .iter()
                    .filter(|e| e.kind == EdgeKind::Sensor && e.source == sensor.tuple_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if edges.is_empty() {
            self.unrouted(&sensor.app_id, &sensor.tuple_type, "no edge leaves this sensor type");
            return;
        }

        let limit = self.loop_limit(&sensor.app_id);
        for edge in edges {
            let Some(device) = self.device_of(&sensor.app_id, &edge.destination) else {
                self.unrouted(&sensor.app_id, &edge.tuple_type, "destination module is not placed");
                continue;
            };
            let Some(transfer) = self.transmit(hierarchy, sensor.gateway, device, edge.network_length) else {
                self.unrouted(&sensor.app_id, &edge.tuple_type, "no route from the sensor gateway");
                continue;
            };
            let mut tuple = self.new_tuple(
                &sensor.app_id,
                &edge,
                sensor.tuple_type.clone(),
                Some(sensor.id),
                now,
                ctx.tracker,
            );
            tuple.push_hop(sensor.tuple_type.clone(), now, limit);
            tracing::debug!(
                tuple = tuple.id,
                sensor = %sensor.name,
                module = %edge.destination,
                delay = sensor.latency + transfer,
                "sensor tuple sent"
            );
            ctx.scheduler
                .schedule(device, EventPayload::TupleArrival(tuple), sensor.latency + transfer);
        }
    }

    fn emit_periodic(&mut self, device: DeviceId, app_id: &str, edge_index: usize, ctx: &mut RoutingContext<'_>) {
        let edge = self
            .deployments
            .get(app_id)
            .and_then(|d| d.app.edges().get(edge_index))
            .cloned();
        let Some(edge) = edge else {
            tracing::warn!(app = %app_id, edge = edge_index, "periodic emission for unknown edge ignored");
            return;
        };
        let Some(period) = edge.periodicity.filter(|p| *p > 0.0) else {
            return;
        };

        let now = ctx.scheduler.now();
        let limit = self.loop_limit(app_id);
        let mut tuple = self.new_tuple(app_id, &edge, edge.source.clone(), None, now, ctx.tracker);
        tuple.push_hop(edge.source.clone(), now, limit);
        self.dispatch(device, tuple, &edge, ctx);

        ctx.scheduler.schedule(
            device,
            EventPayload::PeriodicEmit {
                app_id: app_id.to_string(),
                edge: edge_index,
            },
            period,
        );
    }

    fn arrive(&mut self, device: DeviceId, mut tuple: Tuple, ctx: &mut RoutingContext<'_>) {
        let now = ctx.scheduler.now();
        let limit = self.loop_limit(&tuple.app_id);
        tuple.push_hop(tuple.dst.clone(), now, limit);
        self.check_deadline(&tuple, now, ctx.tracker);
        self.notify(&tuple, now, |listener, module, tuple, time| {
            listener.on_arrival(module, tuple, time)
        });

        let runtime = self.devices.entry(device).or_default();
        if runtime.running.is_some() {
            tracing::trace!(tuple = tuple.id, device, waiting = runtime.queue.len() + 1, "tuple queued");
            runtime.queue.push_back(tuple);
            return;
        }
        self.start_execution(device, tuple, ctx);
    }

    fn start_execution(&mut self, device: DeviceId, tuple: Tuple, ctx: &mut RoutingContext<'_>) {
        let Some(mips) = ctx.hierarchy.device(device).map(|d| d.mips) else {
            self.unrouted(&tuple.app_id, &tuple.tuple_type, "hosting device does not exist");
            return;
        };
        let now = ctx.scheduler.now();
        let service = tuple.cpu_length / mips;

        self.devices.entry(device).or_default().running = Some(now);
        ctx.tracker.on_execution_start(tuple.id, now);
        tracing::debug!(tuple = tuple.id, module = %tuple.dst, device, service, "execution started");
        ctx.scheduler
            .schedule(device, EventPayload::ExecutionDone(tuple), service);
    }

    fn complete(&mut self, device: DeviceId, tuple: Tuple, ctx: &mut RoutingContext<'_>) {
        let now = ctx.scheduler.now();
        let runtime = self.devices.entry(device).or_default();
        if let Some(started) = runtime.running.take() {
            runtime.usage.busy_time += now - started;
        }
        runtime.usage.executed += 1;
        self.counters.tuples_executed += 1;

        ctx.tracker.on_execution_end(&tuple, now);
        self.notify(&tuple, now, |listener, module, tuple, time| {
            listener.on_completion(module, tuple, time)
        });
        self.close_loops(&tuple, now, ctx.tracker);
        self.emit_outputs(device, &tuple, now, ctx);

        let next = self
            .devices
            .get_mut(&device)
            .and_then(|r| r.queue.pop_front());
        if let Some(next) = next {
            self.start_execution(device, next, ctx);
        }
    }

    fn notify(
        &mut self,
        tuple: &Tuple,
        now: SimTime,
        hook: impl Fn(&mut dyn TupleListener, &str, &Tuple, SimTime),
    ) {
        let listeners = self
            .listeners
            .get_mut(&tuple.app_id)
            .and_then(|modules| modules.get_mut(&tuple.dst));
        for listener in listeners.into_iter().flatten() {
            hook(listener.as_mut(), &tuple.dst, tuple, now);
        }
    }

    fn close_loops(&self, tuple: &Tuple, now: SimTime, tracker: &mut LatencyTracker) {
        let Some(deployment) = self.deployments.get(&tuple.app_id) else {
            return;
        };
        for (index, control_loop) in deployment.app.loops().iter().enumerate() {
            if control_loop.modules.last() != Some(&tuple.dst) {
                continue;
            }
            if let Some(start) = tuple.trailing_match(&control_loop.modules) {
                tracker.on_loop_closed(&deployment.app.loop_id(index), start, now);
            }
        }
    }

    /// Applies the module's selectivity mappings to a processed tuple.
    fn emit_outputs(&mut self, device: DeviceId, input: &Tuple, now: SimTime, ctx: &mut RoutingContext<'_>) {
        let module = input.dst.as_str();
        let Some(deployment) = self.deployments.get_mut(&input.app_id) else {
            return;
        };

        let rules: Vec<(usize, String, f64)> = deployment
            .app
            .mappings_for(module, &input.tuple_type)
            .map(|(index, m)| (index, m.output_type.clone(), m.selectivity.fraction()))
            .collect();
        if rules.is_empty() {
            self.unrouted(&input.app_id, &input.tuple_type, "no selectivity mapping for input type");
            return;
        }

        let mut outputs = Vec::new();
        for (index, output_type, fraction) in rules {
            let Some(credit) = deployment.credit.get_mut(index) else {
                continue;
            };
            *credit += fraction;
            let released = (*credit + CREDIT_EPSILON).floor();
            *credit -= released;
            if released >= 1.0 {
                outputs.push((output_type, released as u64));
            }
        }

        for (output_type, count) in outputs {
            let edges = self.edges_from(&input.app_id, module, &output_type);
            for _ in 0..count {
                if edges.is_empty() {
                    self.unrouted(&input.app_id, &output_type, "no edge carries this output type");
                    continue;
                }
                for edge in &edges {
                    let mut tuple = self.new_tuple(
                        &input.app_id,
                        edge,
                        input.dst.clone(),
                        input.origin,
                        now,
                        ctx.tracker,
                    );
                    tuple.provenance = input.provenance.clone();
                    self.dispatch(device, tuple, edge, ctx);
                }
            }
        }
    }

    /// Sends a freshly emitted tuple from `from` along `edge`.
    fn dispatch(&mut self, from: DeviceId, tuple: Tuple, edge: &AppEdge, ctx: &mut RoutingContext<'_>) {
        if edge.kind == EdgeKind::Actuator {
            self.send_to_actuators(from, tuple, ctx);
            return;
        }

        let Some(device) = self.device_of(&tuple.app_id, &edge.destination) else {
            self.unrouted(&tuple.app_id, &tuple.tuple_type, "destination module is not placed");
            return;
        };
        let Some(delay) = self.transmit(ctx.hierarchy, from, device, tuple.network_length) else {
            self.unrouted(&tuple.app_id, &tuple.tuple_type, "no route between devices");
            return;
        };
        tracing::debug!(
            tuple = tuple.id,
            tuple_type = %tuple.tuple_type,
            from = %tuple.src,
            to = %tuple.dst,
            delay,
            "tuple sent"
        );
        ctx.scheduler
            .schedule(device, EventPayload::TupleArrival(tuple), delay);
    }

    /// Delivers to actuators of the tuple's destination type, preferring the
    /// ones sharing a gateway with the sensor that started the flow.
    fn send_to_actuators(&mut self, from: DeviceId, tuple: Tuple, ctx: &mut RoutingContext<'_>) {
        let hierarchy = ctx.hierarchy;
        let gateway = tuple
            .origin
            .and_then(|s| hierarchy.sensor(s))
            .map(|s| s.gateway);

        let of_type: Vec<&Actuator> = hierarchy
            .actuators()
            .iter()
            .filter(|a| a.app_id == tuple.app_id && a.actuator_type == tuple.dst)
            .collect();
        let local: Vec<&Actuator> = of_type
            .iter()
            .copied()
            .filter(|a| Some(a.gateway) == gateway)
            .collect();
        let targets = if local.is_empty() { of_type } else { local };

        if targets.is_empty() {
            self.unrouted(&tuple.app_id, &tuple.tuple_type, "no actuator of the destination type");
            return;
        }

        for actuator in targets {
            let Some(transfer) = self.transmit(hierarchy, from, actuator.gateway, tuple.network_length) else {
                self.unrouted(&tuple.app_id, &tuple.tuple_type, "no route to the actuator gateway");
                continue;
            };
            tracing::debug!(
                tuple = tuple.id,
                actuator = %actuator.name,
                delay = transfer + actuator.latency,
                "tuple sent to actuator"
            );
            ctx.scheduler.schedule(
                actuator.id,
                EventPayload::ActuatorArrival(tuple.clone()),
                transfer + actuator.latency,
            );
        }
    }

    fn deliver_to_actuator(&mut self, actuator: EntityId, mut tuple: Tuple, ctx: &mut RoutingContext<'_>) {
        let now = ctx.scheduler.now();
        let limit = self.loop_limit(&tuple.app_id);
        tuple.push_hop(tuple.dst.clone(), now, limit);
        self.check_deadline(&tuple, now, ctx.tracker);
        self.counters.actuator_deliveries += 1;
        tracing::debug!(tuple = tuple.id, actuator, latency = now - tuple.created_at, "actuator reached");
        self.close_loops(&tuple, now, ctx.tracker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{ControlLoop, Direction, LoopId, Selectivity};
    use crate::device::FogDeviceSpec;
    use crate::placement::{ModuleMapping, PlacementPolicy, PlacementResolver};
    use crate::queue::EventQueue;
    use std::sync::{Arc, Mutex};

    struct Harness {
        hierarchy: DeviceHierarchy,
        queue: EventQueue,
        tracker: LatencyTracker,
        router: TupleRouter,
    }

    impl Harness {
        fn new(hierarchy: DeviceHierarchy, max_time: SimTime) -> Self {
            Self {
                hierarchy,
                queue: EventQueue::new(max_time),
                tracker: LatencyTracker::new(),
                router: TupleRouter::new(),
            }
        }

        fn deploy(&mut self, app: Application, mapping: ModuleMapping) {
            app.validate().unwrap();
            let placement = PlacementResolver::new(&app, &self.hierarchy)
                .resolve(&PlacementPolicy::explicit(mapping))
                .unwrap();
            self.router.deploy(app, placement).unwrap();
        }

        fn run(&mut self) {
            while let Some(event) = self.queue.pop() {
                let mut ctx = RoutingContext {
                    hierarchy: &self.hierarchy,
                    scheduler: &mut self.queue,
                    tracker: &mut self.tracker,
                };
                self.router.handle(event, &mut ctx);
            }
        }
    }

    #[derive(Clone, Default)]
    struct Completions(Arc<Mutex<Vec<(String, SimTime)>>>);

    impl TupleListener for Completions {
        fn on_completion(&mut self, module: &str, _tuple: &Tuple, time: SimTime) {
            self.0.lock().unwrap().push((module.to_string(), time));
        }
    }

    fn single_device(mips: f64) -> (DeviceHierarchy, DeviceId) {
        let mut h = DeviceHierarchy::new();
        let dev = h
            .add_device(FogDeviceSpec::new("dev", mips, 1000, 1000.0, 1000.0), None)
            .unwrap();
        (h, dev)
    }

    /// cloud (2000 MIPS) <- gw (1000 MIPS, 10 latency), bandwidth 1000 everywhere
    fn cloud_and_gateway() -> (DeviceHierarchy, DeviceId, DeviceId) {
        let mut h = DeviceHierarchy::new();
        let cloud = h
            .add_device(FogDeviceSpec::new("cloud", 2000.0, 10000, 1000.0, 1000.0), None)
            .unwrap();
        let gw = h
            .add_device(
                FogDeviceSpec::new("gw", 1000.0, 1000, 1000.0, 1000.0).with_uplink_latency(10.0),
                Some(cloud),
            )
            .unwrap();
        (h, cloud, gw)
    }

    #[test]
    fn test_cross_level_transit_delay() {
        let mut h = DeviceHierarchy::new();
        let cloud = h
            .add_device(FogDeviceSpec::new("cloud", 1000.0, 1000, 1000.0, 1000.0), None)
            .unwrap();
        let edge = h
            .add_device(
                FogDeviceSpec::new("edge", 1000.0, 1000, 1000.0, 1000.0).with_uplink_latency(50.0),
                Some(cloud),
            )
            .unwrap();
        let sensor = h.add_sensor("s-0", "S", "app", edge, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("A", 100.0, 10, 10.0).unwrap();
        app.add_module("B", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "A", "S", Direction::Up, EdgeKind::Sensor, 0.0, 0.0));
        app.add_edge(AppEdge::new("A", "B", "X", Direction::Up, EdgeKind::Module, 0.0, 500.0));
        app.add_tuple_mapping("A", "S", "X", Selectivity::one_to_one()).unwrap();
        app.set_loops(vec![ControlLoop::new(["A", "B"])]);

        let mut harness = Harness::new(h, 1000.0);
        harness.deploy(app, ModuleMapping::new().with("A", "edge").with("B", "cloud"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        let id = LoopId::new("app", 0);
        assert_eq!(harness.tracker.loop_average(&id), Some(50.5));
        assert_eq!(harness.router.counters().network_bytes, 500.0);
        // B has no mapping for X
        assert_eq!(harness.router.counters().unrouted_tuples, 1);
    }

    #[test]
    fn test_fifo_service_on_busy_device() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 1000.0, 0.0));

        let mut harness = Harness::new(h, 100.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev"));
        let completions = Completions::default();
        harness
            .router
            .register_listener("app", "M", Box::new(completions.clone()));

        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        let times: Vec<SimTime> = completions.0.lock().unwrap().iter().map(|(_, t)| *t).collect();
        assert_eq!(times, vec![1.0, 2.0]);

        let usage = harness.router.device_usage(dev);
        assert_eq!(usage.executed, 2);
        assert_eq!(usage.busy_time, 2.0);
        assert_eq!(harness.tracker.tuple_type_average("S"), Some(1.0));
        assert_eq!(harness.router.queue_len(dev), 0);
    }

    #[test]
    fn test_output_without_edge_is_counted_and_run_continues() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));
        app.add_tuple_mapping("M", "S", "X", Selectivity::one_to_one()).unwrap();

        let mut harness = Harness::new(h, 100.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();
        assert_eq!(harness.router.counters().unrouted_tuples, 1);

        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 10.0);
        harness.run();
        assert_eq!(harness.router.counters().unrouted_tuples, 2);
        assert_eq!(harness.router.counters().tuples_executed, 2);
    }

    #[test]
    fn test_input_without_mapping_is_counted_and_run_continues() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("A", 100.0, 10, 10.0).unwrap();
        app.add_module("B", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "A", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));
        app.add_edge(AppEdge::new("A", "B", "X", Direction::Up, EdgeKind::Module, 100.0, 0.0));
        app.add_tuple_mapping("A", "S", "X", Selectivity::one_to_one()).unwrap();

        let mut harness = Harness::new(h, 100.0);
        harness.deploy(app, ModuleMapping::new().with("A", "dev").with("B", "dev"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 10.0);
        harness.run();

        let counters = harness.router.counters();
        assert_eq!(counters.unrouted_tuples, 2);
        assert_eq!(counters.tuples_executed, 4);
        assert_eq!(counters.tuples_created, 4);
        assert_eq!(harness.router.device_usage(dev).executed, 4);
    }

    #[test]
    fn test_sensor_type_without_edge_is_unrouted() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "OTHER", "app", dev, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));

        let mut harness = Harness::new(h, 100.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        assert_eq!(harness.router.counters().unrouted_tuples, 1);
        assert_eq!(harness.router.counters().tuples_created, 0);
    }

    #[test]
    fn test_round_trip_loop_delay() {
        let (mut h, _cloud, gw) = cloud_and_gateway();
        let sensor = h.add_sensor("s-0", "S", "app", gw, 2.0, None).unwrap();
        h.add_actuator("d-0", "D", "app", gw, 3.0).unwrap();

        let mut app = Application::new("app");
        app.add_module("A", 100.0, 10, 10.0).unwrap();
        app.add_module("B", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "A", "S", Direction::Up, EdgeKind::Sensor, 1000.0, 100.0));
        app.add_edge(AppEdge::new("A", "B", "X", Direction::Up, EdgeKind::Module, 2000.0, 500.0));
        app.add_edge(AppEdge::new("B", "D", "Y", Direction::Actuator, EdgeKind::Actuator, 0.0, 100.0));
        app.add_tuple_mapping("A", "S", "X", Selectivity::one_to_one()).unwrap();
        app.add_tuple_mapping("B", "X", "Y", Selectivity::one_to_one()).unwrap();
        app.set_loops(vec![ControlLoop::new(["S", "A", "B", "D"])]);

        let mut harness = Harness::new(h, 1000.0);
        harness.deploy(app, ModuleMapping::new().with("A", "gw").with("B", "cloud"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        // sensor 2 + A cpu 1 + up-link 10.5 + B cpu 1 + down-link 10.1 + actuator 3
        let expected = 2.0 + 1.0 + 10.5 + 1.0 + 10.1 + 3.0;
        let average = harness.tracker.loop_average(&LoopId::new("app", 0)).unwrap();
        assert!((average - expected).abs() < 1e-9, "got {}", average);
        assert_eq!(harness.router.counters().actuator_deliveries, 1);
    }

    #[test]
    fn test_fractional_selectivity_emits_every_second_input() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_module("N", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));
        app.add_edge(AppEdge::new("M", "N", "Y", Direction::Up, EdgeKind::Module, 100.0, 0.0));
        app.add_tuple_mapping("M", "S", "Y", Selectivity::Fractional(0.5)).unwrap();

        let mut harness = Harness::new(h, 1000.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev").with("N", "dev"));
        for i in 0..4 {
            harness
                .queue
                .schedule_at(sensor, EventPayload::SensorEmit, i as f64 * 10.0);
        }
        harness.run();

        assert_eq!(harness.tracker.tuples_created("S"), 4);
        assert_eq!(harness.tracker.tuples_created("Y"), 2);
        assert_eq!(harness.router.counters().tuples_executed, 6);
    }

    #[test]
    fn test_fan_out_selectivity() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 0.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_module("N", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));
        app.add_edge(AppEdge::new("M", "N", "Y", Direction::Up, EdgeKind::Module, 100.0, 0.0));
        app.add_tuple_mapping("M", "S", "Y", Selectivity::Fractional(2.0)).unwrap();

        let mut harness = Harness::new(h, 1000.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev").with("N", "dev"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        assert_eq!(harness.tracker.tuples_created("Y"), 2);
    }

    #[test]
    fn test_deadline_miss_is_counted() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 5.0, None).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_edge(
            AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0).with_deadline(1.0),
        );

        let mut harness = Harness::new(h, 100.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        assert_eq!(harness.router.counters().deadline_misses, 1);
        assert_eq!(harness.tracker.deadline_misses("S"), 1);
    }

    #[test]
    fn test_actuator_on_sensor_gateway_preferred() {
        let mut h = DeviceHierarchy::new();
        let cloud = h
            .add_device(FogDeviceSpec::new("cloud", 1000.0, 1000, 1000.0, 1000.0), None)
            .unwrap();
        let gw1 = h
            .add_device(FogDeviceSpec::new("gw1", 1000.0, 1000, 1000.0, 1000.0), Some(cloud))
            .unwrap();
        let gw2 = h
            .add_device(FogDeviceSpec::new("gw2", 1000.0, 1000, 1000.0, 1000.0), Some(cloud))
            .unwrap();
        let sensor = h.add_sensor("s-0", "S", "app", gw1, 0.0, None).unwrap();
        h.add_actuator("d-1", "D", "app", gw1, 0.0).unwrap();
        h.add_actuator("d-2", "D", "app", gw2, 0.0).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));
        app.add_edge(AppEdge::new("M", "D", "ON", Direction::Actuator, EdgeKind::Actuator, 0.0, 10.0));
        app.add_tuple_mapping("M", "S", "ON", Selectivity::one_to_one()).unwrap();

        let mut harness = Harness::new(h, 100.0);
        harness.deploy(app, ModuleMapping::new().with("M", "cloud"));
        harness.queue.schedule_at(sensor, EventPayload::SensorEmit, 0.0);
        harness.run();

        assert_eq!(harness.router.counters().actuator_deliveries, 1);
    }

    #[test]
    fn test_periodic_edge_emits_every_period() {
        let (h, dev) = single_device(1000.0);

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_module("N", 100.0, 10, 10.0).unwrap();
        app.add_edge(
            AppEdge::new("M", "N", "TICK", Direction::Up, EdgeKind::Module, 100.0, 0.0).with_periodicity(10.0),
        );

        let mut harness = Harness::new(h, 35.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev").with("N", "dev"));

        let sources = harness.router.periodic_sources();
        assert_eq!(sources.len(), 1);
        let source = &sources[0];
        harness.queue.schedule_at(
            source.device,
            EventPayload::PeriodicEmit {
                app_id: source.app_id.clone(),
                edge: source.edge,
            },
            source.period,
        );
        harness.run();

        assert_eq!(harness.tracker.tuples_created("TICK"), 3);
        assert_eq!(harness.router.device_usage(dev).executed, 3);
    }

    #[test]
    fn test_periodic_sensor_reschedules_itself() {
        let (mut h, dev) = single_device(1000.0);
        let sensor = h.add_sensor("s-0", "S", "app", dev, 0.0, Some(5.0)).unwrap();

        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        app.add_edge(AppEdge::new("S", "M", "S", Direction::Up, EdgeKind::Sensor, 100.0, 0.0));

        let mut harness = Harness::new(h, 22.0);
        harness.deploy(app, ModuleMapping::new().with("M", "dev"));
        harness.queue.schedule_at(sensor, EventPayload::SensorTick, 0.0);
        harness.run();

        // 0, 5, 10, 15, 20
        assert_eq!(harness.tracker.tuples_created("S"), 5);
    }

    #[test]
    fn test_duplicate_deployment_rejected() {
        let (h, _) = single_device(1000.0);
        let mut app = Application::new("app");
        app.add_module("M", 100.0, 10, 10.0).unwrap();
        let placement = PlacementResolver::new(&app, &h)
            .resolve(&PlacementPolicy::edge_ward())
            .unwrap();

        let mut router = TupleRouter::new();
        router.deploy(app.clone(), placement.clone()).unwrap();
        let err = router.deploy(app, placement).unwrap_err();
        assert_eq!(err, FogError::DuplicateApplication("app".to_string()));
    }
}
