//! Device hierarchy: a tree of compute devices with attached sensors and
//! actuators.
//!
//! Every device except the root has exactly one parent, reached over an
//! uplink with its own latency and bandwidth. Link delays between two
//! arbitrary devices are computed along the path through their lowest common
//! ancestor.
//!
//! # Link delay
//!
//! A tuple of payload size `len` crossing one hop costs:
//!
//! | Hop | Delay |
//! |-----|-------|
//! | child → parent | `len / child.uplink_bandwidth + child.uplink_latency` |
//! | parent → child | `len / parent.downlink_bandwidth + child.uplink_latency` |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{FogError, FogResult};
use crate::types::{DeviceId, EntityId, SimTime};

/// Capacity and link description of a device, before it joins a hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FogDeviceSpec {
    pub name: String,
    /// Processing rate
    pub mips: f64,
    /// Memory capacity
    pub ram: u64,
    /// Bandwidth of the link towards the parent
    pub uplink_bandwidth: f64,
    /// Bandwidth used when this device sends to its children
    pub downlink_bandwidth: f64,
    /// Latency of the link towards the parent
    #[serde(default)]
    pub uplink_latency: SimTime,
}

impl FogDeviceSpec {
    pub fn new(name: impl Into<String>, mips: f64, ram: u64, uplink_bandwidth: f64, downlink_bandwidth: f64) -> Self {
        Self {
            name: name.into(),
            mips,
            ram,
            uplink_bandwidth,
            downlink_bandwidth,
            uplink_latency: 0.0,
        }
    }

    pub fn with_uplink_latency(mut self, latency: SimTime) -> Self {
        self.uplink_latency = latency;
        self
    }

    fn check(&self) -> FogResult<()> {
        let invalid = |reason: &str| FogError::InvalidDevice {
            device: self.name.clone(),
            reason: reason.to_string(),
        };
        if !(self.mips > 0.0) {
            return Err(invalid("processing rate must be positive"));
        }
        if !(self.uplink_bandwidth > 0.0) || !(self.downlink_bandwidth > 0.0) {
            return Err(invalid("bandwidth must be positive"));
        }
        if !(self.uplink_latency >= 0.0) {
            return Err(invalid("uplink latency must be non-negative"));
        }
        Ok(())
    }
}

/// A compute device placed in the hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FogDevice {
    pub id: DeviceId,
    pub name: String,
    pub mips: f64,
    pub ram: u64,
    pub uplink_bandwidth: f64,
    pub downlink_bandwidth: f64,
    pub uplink_latency: SimTime,
    pub parent: Option<DeviceId>,
    /// Distance from the root (root = 0)
    pub level: u32,
}

/// A boundary endpoint that injects tuples of one type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: EntityId,
    pub name: String,
    pub tuple_type: String,
    pub app_id: String,
    /// Device the sensor is attached to
    pub gateway: DeviceId,
    /// Latency of the sensor's link to its gateway
    pub latency: SimTime,
    /// Deterministic transmit interval; `None` means emissions are injected
    /// by the driver
    pub interval: Option<SimTime>,
}

/// A boundary endpoint that consumes tuples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Actuator {
    pub id: EntityId,
    pub name: String,
    pub actuator_type: String,
    pub app_id: String,
    pub gateway: DeviceId,
    pub latency: SimTime,
}

/// The devices traversed between two devices.
///
/// `up` lists the devices whose uplink is crossed on the way to the shared
/// ancestor, `down` lists the devices whose uplink is crossed (downwards) on
/// the way from the shared ancestor to the destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub up: Vec<DeviceId>,
    pub down: Vec<DeviceId>,
}

impl Route {
    /// Number of links crossed.
    pub fn hops(&self) -> usize {
        self.up.len() + self.down.len()
    }
}

/// A tree of compute devices with attached boundary endpoints.
///
/// # Example
///
/// ```
/// use fogloop::device::{DeviceHierarchy, FogDeviceSpec};
///
/// let mut hierarchy = DeviceHierarchy::new();
/// let cloud = hierarchy.add_device(FogDeviceSpec::new("cloud", 44800.0, 40000, 100.0, 10000.0), None).unwrap();
/// let edge = hierarchy
///     .add_device(FogDeviceSpec::new("edge", 2800.0, 4000, 1000.0, 10000.0).with_uplink_latency(50.0), Some(cloud))
///     .unwrap();
///
/// assert_eq!(hierarchy.level(edge), Some(1));
/// assert_eq!(hierarchy.uplink_latency(edge), Some(50.0));
/// assert_eq!(hierarchy.transfer_delay(edge, cloud, 500.0), Some(50.5));
/// ```
#[derive(Clone, Debug, Default)]
pub struct DeviceHierarchy {
    devices: Vec<FogDevice>,
    index: HashMap<DeviceId, usize>,
    by_name: HashMap<String, DeviceId>,
    sensors: Vec<Sensor>,
    actuators: Vec<Actuator>,
    root: Option<DeviceId>,
    next_id: EntityId,
}

impl DeviceHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Adds a device under `parent`, or as the root when `parent` is `None`.
    ///
    /// The parent must already exist, so a device can never become its own
    /// ancestor.
    pub fn add_device(&mut self, spec: FogDeviceSpec, parent: Option<DeviceId>) -> FogResult<DeviceId> {
        spec.check()?;
        if self.by_name.contains_key(&spec.name) {
            return Err(FogError::DuplicateDevice(spec.name));
        }

        let level = match parent {
            Some(parent_id) => match self.device(parent_id) {
                Some(p) => p.level + 1,
                None => {
                    return Err(FogError::Cycle {
                        device: spec.name,
                        parent: parent_id,
                    })
                }
            },
            None => {
                if let Some(root) = self.root.and_then(|r| self.device(r)) {
                    return Err(FogError::MultipleRoots {
                        device: spec.name,
                        root: root.name.clone(),
                    });
                }
                0
            }
        };

        let id = self.allocate_id();
        let device = FogDevice {
            id,
            name: spec.name,
            mips: spec.mips,
            ram: spec.ram,
            uplink_bandwidth: spec.uplink_bandwidth,
            downlink_bandwidth: spec.downlink_bandwidth,
            uplink_latency: if parent.is_some() { spec.uplink_latency } else { 0.0 },
            parent,
            level,
        };

        if parent.is_none() {
            self.root = Some(id);
        }
        self.by_name.insert(device.name.clone(), id);
        self.index.insert(id, self.devices.len());
        self.devices.push(device);
        Ok(id)
    }

    /// Attaches a sensor to an existing gateway device.
    pub fn add_sensor(
        &mut self,
        name: impl Into<String>,
        tuple_type: impl Into<String>,
        app_id: impl Into<String>,
        gateway: DeviceId,
        latency: SimTime,
        interval: Option<SimTime>,
    ) -> FogResult<EntityId> {
        self.require_device(gateway)?;
        let id = self.allocate_id();
        self.sensors.push(Sensor {
            id,
            name: name.into(),
            tuple_type: tuple_type.into(),
            app_id: app_id.into(),
            gateway,
            latency,
            interval,
        });
        Ok(id)
    }

    /// Attaches an actuator to an existing gateway device.
    pub fn add_actuator(
        &mut self,
        name: impl Into<String>,
        actuator_type: impl Into<String>,
        app_id: impl Into<String>,
        gateway: DeviceId,
        latency: SimTime,
    ) -> FogResult<EntityId> {
        self.require_device(gateway)?;
        let id = self.allocate_id();
        self.actuators.push(Actuator {
            id,
            name: name.into(),
            actuator_type: actuator_type.into(),
            app_id: app_id.into(),
            gateway,
            latency,
        });
        Ok(id)
    }

    fn require_device(&self, id: DeviceId) -> FogResult<&FogDevice> {
        self.device(id)
            .ok_or_else(|| FogError::UnknownDevice(id.to_string()))
    }

    pub fn device(&self, id: DeviceId) -> Option<&FogDevice> {
        self.index.get(&id).map(|&i| &self.devices[i])
    }

    pub fn device_by_name(&self, name: &str) -> Option<&FogDevice> {
        self.by_name.get(name).and_then(|&id| self.device(id))
    }

    /// Devices in insertion order.
    pub fn devices(&self) -> &[FogDevice] {
        &self.devices
    }

    /// Sensors in registration order.
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn sensor(&self, id: EntityId) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// Actuators in registration order.
    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    pub fn actuator(&self, id: EntityId) -> Option<&Actuator> {
        self.actuators.iter().find(|a| a.id == id)
    }

    pub fn root(&self) -> Option<DeviceId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn level(&self, id: DeviceId) -> Option<u32> {
        self.device(id).map(|d| d.level)
    }

    /// Latency of the link to the parent; zero for the root.
    pub fn uplink_latency(&self, id: DeviceId) -> Option<SimTime> {
        self.device(id).map(|d| d.uplink_latency)
    }

    /// Devices from `id` up to and including the root.
    pub fn path_to_root(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut path = Vec::new();
        let mut current = self.device(id);
        while let Some(device) = current {
            path.push(device.id);
            current = device.parent.and_then(|p| self.device(p));
        }
        path
    }

    /// Returns true if `ancestor` lies on the path from `id` to the root
    /// (a device is its own ancestor).
    pub fn is_ancestor(&self, ancestor: DeviceId, id: DeviceId) -> bool {
        self.path_to_root(id).contains(&ancestor)
    }

    pub fn lowest_common_ancestor(&self, a: DeviceId, b: DeviceId) -> Option<DeviceId> {
        let path_a = self.path_to_root(a);
        self.path_to_root(b)
            .into_iter()
            .find(|candidate| path_a.contains(candidate))
    }

    /// Path between two devices through their lowest common ancestor.
    pub fn route(&self, from: DeviceId, to: DeviceId) -> Option<Route> {
        let shared = self.lowest_common_ancestor(from, to)?;
        let up = self
            .path_to_root(from)
            .into_iter()
            .take_while(|&d| d != shared)
            .collect();
        let mut down: Vec<DeviceId> = self
            .path_to_root(to)
            .into_iter()
            .take_while(|&d| d != shared)
            .collect();
        down.reverse();
        Some(Route { up, down })
    }

    /// Sum of link latencies between two devices.
    pub fn path_latency(&self, from: DeviceId, to: DeviceId) -> Option<SimTime> {
        let route = self.route(from, to)?;
        Some(
            route
                .up
                .iter()
                .chain(route.down.iter())
                .filter_map(|&d| self.uplink_latency(d))
                .sum(),
        )
    }

    /// Transmission plus propagation delay of a payload between two devices.
    ///
    /// Zero when both ends are the same device.
    pub fn transfer_delay(&self, from: DeviceId, to: DeviceId, network_length: f64) -> Option<SimTime> {
        let route = self.route(from, to)?;
        let mut delay = 0.0;
        for &child in &route.up {
            let device = self.device(child)?;
            delay += network_length / device.uplink_bandwidth + device.uplink_latency;
        }
        for &child in &route.down {
            let device = self.device(child)?;
            let parent = device.parent.and_then(|p| self.device(p))?;
            delay += network_length / parent.downlink_bandwidth + device.uplink_latency;
        }
        Some(delay)
    }
}
