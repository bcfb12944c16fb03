//! Module placement: mapping every module of an application onto a device.
//!
//! Two policies are available through [`PlacementPolicy`]:
//!
//! - [`PlacementPolicy::Explicit`]: the caller supplies a complete
//!   `device -> {modules}` table which is checked for completeness.
//! - [`PlacementPolicy::EdgeWard`]: modules are pushed as close as capacity
//!   allows to the sensors that feed them, walking upwards towards the root
//!   when a device is full.
//!
//! Resolution is pure: neither the application nor the hierarchy is mutated.
//! Demand of applications placed earlier is passed in as a
//! [`CommittedDemand`]; the caller records the new table in it afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::application::{AppModule, Application, Direction, EdgeKind};
use crate::device::DeviceHierarchy;
use crate::error::{FogError, FogResult};
use crate::types::DeviceId;

/// A `device name -> {module names}` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleMapping {
    mapping: BTreeMap<String, BTreeSet<String>>,
}

impl ModuleMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `module` onto the device named `device`.
    pub fn add_module_to_device(&mut self, module: impl Into<String>, device: impl Into<String>) {
        self.mapping
            .entry(device.into())
            .or_default()
            .insert(module.into());
    }

    /// Builder form of [`add_module_to_device`](Self::add_module_to_device).
    pub fn with(mut self, module: impl Into<String>, device: impl Into<String>) -> Self {
        self.add_module_to_device(module, device);
        self
    }

    /// Iterates over `(device name, module names)`.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.mapping.iter()
    }

    /// Devices that list `module`.
    pub fn devices_for(&self, module: &str) -> Vec<&str> {
        self.mapping
            .iter()
            .filter(|(_, modules)| modules.contains(module))
            .map(|(device, _)| device.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.values().all(BTreeSet::is_empty)
    }
}

/// The resolved `module -> device` assignment of one application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementTable {
    placements: BTreeMap<String, DeviceId>,
}

impl PlacementTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign(&mut self, module: &str, device: DeviceId) {
        self.placements.insert(module.to_string(), device);
    }

    /// Device hosting `module`.
    pub fn device_of(&self, module: &str) -> Option<DeviceId> {
        self.placements.get(module).copied()
    }

    /// Modules hosted on `device`, in name order.
    pub fn modules_on(&self, device: DeviceId) -> Vec<&str> {
        self.placements
            .iter()
            .filter(|(_, &d)| d == device)
            .map(|(m, _)| m.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceId)> {
        self.placements.iter()
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

/// How modules are assigned to devices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Use the given table verbatim.
    Explicit { mapping: ModuleMapping },
    /// Push modules towards their data sources; `pinned` modules are placed
    /// as listed before the heuristic runs.
    EdgeWard {
        #[serde(default)]
        pinned: ModuleMapping,
    },
}

impl PlacementPolicy {
    pub fn explicit(mapping: ModuleMapping) -> Self {
        PlacementPolicy::Explicit { mapping }
    }

    /// Edge-ward placement with nothing pinned.
    pub fn edge_ward() -> Self {
        PlacementPolicy::EdgeWard {
            pinned: ModuleMapping::new(),
        }
    }

    pub fn edge_ward_with(pinned: ModuleMapping) -> Self {
        PlacementPolicy::EdgeWard { pinned }
    }
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::edge_ward()
    }
}

/// Demand assigned to one device.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Occupancy {
    mips: f64,
    ram: u64,
}

/// Per-device demand of the applications already placed on a hierarchy.
///
/// Applications sharing a hierarchy share its capacity: the owner of the
/// hierarchy commits every resolved table here and hands it to the next
/// [`PlacementResolver`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommittedDemand {
    devices: HashMap<DeviceId, Occupancy>,
}

impl CommittedDemand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the demand of every module `table` places.
    pub fn commit(&mut self, app: &Application, table: &PlacementTable) {
        for (module, &device) in table.iter() {
            if let Some(module) = app.module(module) {
                commit(&mut self.devices, device, module);
            }
        }
    }

    /// MIPS committed to `device`.
    pub fn mips(&self, device: DeviceId) -> f64 {
        self.devices.get(&device).map(|o| o.mips).unwrap_or(0.0)
    }

    /// RAM committed to `device`.
    pub fn ram(&self, device: DeviceId) -> u64 {
        self.devices.get(&device).map(|o| o.ram).unwrap_or(0)
    }
}

/// Resolves a [`PlacementPolicy`] against an application and a hierarchy.
#[derive(Debug)]
pub struct PlacementResolver<'a> {
    app: &'a Application,
    hierarchy: &'a DeviceHierarchy,
    committed: Option<&'a CommittedDemand>,
}

impl<'a> PlacementResolver<'a> {
    pub fn new(app: &'a Application, hierarchy: &'a DeviceHierarchy) -> Self {
        Self {
            app,
            hierarchy,
            committed: None,
        }
    }

    /// Counts demand placed by earlier applications against capacity.
    pub fn with_committed(mut self, committed: &'a CommittedDemand) -> Self {
        self.committed = Some(committed);
        self
    }

    /// Produces a placement table covering every module referenced by an edge.
    pub fn resolve(&self, policy: &PlacementPolicy) -> FogResult<PlacementTable> {
        let table = match policy {
            PlacementPolicy::Explicit { mapping } => self.resolve_explicit(mapping)?,
            PlacementPolicy::EdgeWard { pinned } => self.resolve_edge_ward(pinned)?,
        };
        for (module, device) in table.iter() {
            tracing::info!(
                app = %self.app.app_id,
                module = %module,
                device = %self.device_name(*device),
                "module placed"
            );
        }
        Ok(table)
    }

    fn device_name(&self, id: DeviceId) -> &str {
        self.hierarchy
            .device(id)
            .map(|d| d.name.as_str())
            .unwrap_or("?")
    }

    fn incomplete(&self, module: &str, reason: impl Into<String>) -> FogError {
        FogError::IncompletePlacement {
            app_id: self.app.app_id.clone(),
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    /// Looks up the single device a mapping assigns to `module`, if any.
    fn mapped_device(&self, mapping: &ModuleMapping, module: &str) -> FogResult<Option<DeviceId>> {
        let devices = mapping.devices_for(module);
        match devices.as_slice() {
            [] => Ok(None),
            [name] => self
                .hierarchy
                .device_by_name(name)
                .map(|d| Some(d.id))
                .ok_or_else(|| self.incomplete(module, format!("device '{}' does not exist", name))),
            many => Err(self.incomplete(
                module,
                format!("mapped to more than one device: {}", many.join(", ")),
            )),
        }
    }

    fn check_mapping_modules(&self, mapping: &ModuleMapping) -> FogResult<()> {
        for (_, modules) in mapping.iter() {
            if let Some(unknown) = modules.iter().find(|m| !self.app.has_module(m)) {
                return Err(self.incomplete(unknown, "module is not declared by the application"));
            }
        }
        Ok(())
    }

    fn resolve_explicit(&self, mapping: &ModuleMapping) -> FogResult<PlacementTable> {
        self.check_mapping_modules(mapping)?;

        let required: BTreeSet<&str> = self
            .app
            .edge_modules()
            .into_iter()
            .map(|m| m.name.as_str())
            .collect();

        let mut table = PlacementTable::new();
        for module in self.app.modules() {
            match self.mapped_device(mapping, &module.name)? {
                Some(device) => table.assign(&module.name, device),
                None if required.contains(module.name.as_str()) => {
                    return Err(self.incomplete(&module.name, "not mapped to any device"))
                }
                None => {}
            }
        }
        Ok(table)
    }

    fn resolve_edge_ward(&self, pinned: &ModuleMapping) -> FogResult<PlacementTable> {
        self.check_mapping_modules(pinned)?;

        let mut table = PlacementTable::new();
        let mut occupancy: HashMap<DeviceId, Occupancy> = self
            .committed
            .map(|c| c.devices.clone())
            .unwrap_or_default();

        let modules = self.app.edge_modules();
        for module in &modules {
            if let Some(device) = self.mapped_device(pinned, &module.name)? {
                commit(&mut occupancy, device, module);
                table.assign(&module.name, device);
            }
        }

        for module in placement_order(self.app, &modules) {
            if table.device_of(&module.name).is_some() {
                continue;
            }
            let start = self.start_device(module, &table).ok_or_else(|| {
                self.incomplete(&module.name, "device hierarchy has no root")
            })?;

            let chosen = self
                .hierarchy
                .path_to_root(start)
                .into_iter()
                .find(|&candidate| self.fits(&occupancy, candidate, module));

            match chosen {
                Some(device) => {
                    tracing::debug!(
                        module = %module.name,
                        start = %self.device_name(start),
                        device = %self.device_name(device),
                        "edge-ward candidate accepted"
                    );
                    commit(&mut occupancy, device, module);
                    table.assign(&module.name, device);
                }
                None => {
                    return Err(FogError::InsufficientCapacity {
                        app_id: self.app.app_id.clone(),
                        module: module.name.clone(),
                        mips: module.mips,
                        ram: module.ram,
                    })
                }
            }
        }

        Ok(table)
    }

    fn fits(&self, occupancy: &HashMap<DeviceId, Occupancy>, device: DeviceId, module: &AppModule) -> bool {
        let Some(d) = self.hierarchy.device(device) else {
            return false;
        };
        let used = occupancy.get(&device).copied().unwrap_or_default();
        used.mips + module.mips <= d.mips && used.ram + module.ram <= d.ram
    }

    /// Where the upward search for `module` begins.
    fn start_device(&self, module: &AppModule, table: &PlacementTable) -> Option<DeviceId> {
        let closest_to_root = |devices: Vec<DeviceId>| {
            // min_by_key keeps the first of equal keys.
            devices
                .into_iter()
                .min_by_key(|&d| self.hierarchy.level(d).unwrap_or(u32::MAX))
        };

        let up_predecessors: Vec<DeviceId> = self
            .app
            .edges()
            .iter()
            .filter(|e| {
                e.kind == EdgeKind::Module && e.direction == Direction::Up && e.destination == module.name
            })
            .filter_map(|e| table.device_of(&e.source))
            .collect();
        if let Some(device) = closest_to_root(up_predecessors) {
            return Some(device);
        }

        let sensor_types: BTreeSet<&str> = self
            .app
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::Sensor && e.destination == module.name)
            .map(|e| e.source.as_str())
            .collect();
        let gateway = self
            .hierarchy
            .sensors()
            .iter()
            .filter(|s| s.app_id == self.app.app_id && sensor_types.contains(s.tuple_type.as_str()))
            .map(|s| s.gateway)
            .fold(None::<DeviceId>, |best, gw| match best {
                // Strictly deeper wins; siblings keep the first registered sensor's gateway.
                Some(b) if self.hierarchy.level(gw) <= self.hierarchy.level(b) => Some(b),
                _ => Some(gw),
            });
        if gateway.is_some() {
            return gateway;
        }

        let any_predecessors: Vec<DeviceId> = self
            .app
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::Module && e.destination == module.name)
            .filter_map(|e| table.device_of(&e.source))
            .collect();
        closest_to_root(any_predecessors).or_else(|| self.hierarchy.root())
    }
}

fn commit(occupancy: &mut HashMap<DeviceId, Occupancy>, device: DeviceId, module: &AppModule) {
    let entry = occupancy.entry(device).or_default();
    entry.mips += module.mips;
    entry.ram += module.ram;
}

/// Orders modules so that upstream producers are placed before consumers.
///
/// Kahn's algorithm over `Up` module edges; ready modules are taken in
/// declaration order. Modules caught in an upward cycle follow in
/// declaration order.
fn placement_order<'m>(app: &Application, modules: &[&'m AppModule]) -> Vec<&'m AppModule> {
    let position: HashMap<&str, usize> = modules
        .iter()
        .enumerate()
        .map(|(i, m)| (m.name.as_str(), i))
        .collect();

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];
    let mut in_degree = vec![0usize; modules.len()];
    for edge in app.edges() {
        if edge.kind != EdgeKind::Module || edge.direction != Direction::Up {
            continue;
        }
        if let (Some(&from), Some(&to)) = (
            position.get(edge.source.as_str()),
            position.get(edge.destination.as_str()),
        ) {
            if from != to {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..modules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(modules.len());
    let mut done = vec![false; modules.len()];
    while let Some(next) = ready.pop_first() {
        order.push(next);
        done[next] = true;
        for &succ in &adj[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }
    order.extend((0..modules.len()).filter(|&i| !done[i]));

    order.into_iter().map(|i| modules[i]).collect()
}
