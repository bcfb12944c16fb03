//! Scenario files.
//!
//! A scenario describes a device hierarchy, its sensors and actuators, and
//! the applications to place on it, in YAML or JSON.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   name: hypotension
//!   max_time: 1000
//!   log_level: info
//!
//! devices:
//!   - name: cloud
//!     mips: 44800
//!     ram: 40000
//!     uplink_bandwidth: 100
//!     downlink_bandwidth: 10000
//!   - name: mobile-0
//!     parent: cloud
//!     mips: 2800
//!     ram: 4000
//!     uplink_bandwidth: 10000
//!     downlink_bandwidth: 270
//!     uplink_latency: 2
//!
//! sensors:
//!   - name: bp-0
//!     tuple_type: BP
//!     app_id: hypotension
//!     gateway: mobile-0
//!     latency: 6
//!     interval: 5
//!
//! actuators:
//!   - name: display-0
//!     actuator_type: DISPLAY
//!     app_id: hypotension
//!     gateway: mobile-0
//!     latency: 1
//!
//! applications:
//!   - app_id: hypotension
//!     modules:
//!       - { name: client, mips: 10, ram: 10, bw: 1000 }
//!     edges:
//!       - { source: BP, destination: client, tuple_type: BP, direction: up, kind: sensor, cpu_length: 1000, network_length: 500 }
//!       - { source: client, destination: DISPLAY, tuple_type: SHOW, direction: actuator, kind: actuator, cpu_length: 0, network_length: 500 }
//!     mappings:
//!       - { module: client, input_type: BP, output_type: SHOW, selectivity: 1.0 }
//!     loops:
//!       - [BP, client, DISPLAY]
//!     placement:
//!       policy: explicit
//!       mapping:
//!         mobile-0: [client]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::application::{AppEdge, AppModule, Application, ControlLoop, Selectivity};
use crate::device::{DeviceHierarchy, FogDeviceSpec};
use crate::engine::FogSimulation;
use crate::error::FogError;
use crate::placement::PlacementPolicy;
use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error(transparent)]
    Model(#[from] FogError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global simulation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Name reported in statistics
    #[serde(default)]
    pub name: String,

    /// No event is dispatched after this time
    #[serde(default = "default_max_time")]
    pub max_time: SimTime,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_time() -> SimTime {
    10_000.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_time: default_max_time(),
            log_level: default_log_level(),
        }
    }
}

/// A device, attached to its parent by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,

    /// Parent device name; the single device without one is the root
    #[serde(default)]
    pub parent: Option<String>,

    pub mips: f64,
    pub ram: u64,
    pub uplink_bandwidth: f64,
    pub downlink_bandwidth: f64,

    #[serde(default)]
    pub uplink_latency: SimTime,
}

impl DeviceConfig {
    fn spec(&self) -> FogDeviceSpec {
        FogDeviceSpec::new(
            self.name.clone(),
            self.mips,
            self.ram,
            self.uplink_bandwidth,
            self.downlink_bandwidth,
        )
        .with_uplink_latency(self.uplink_latency)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub tuple_type: String,
    pub app_id: String,
    /// Gateway device name
    pub gateway: String,
    #[serde(default)]
    pub latency: SimTime,
    /// Deterministic transmit interval; omit to inject emissions manually
    #[serde(default)]
    pub interval: Option<SimTime>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub name: String,
    pub actuator_type: String,
    pub app_id: String,
    /// Gateway device name
    pub gateway: String,
    #[serde(default)]
    pub latency: SimTime,
}

/// A selectivity mapping; `selectivity` defaults to the 1-to-1 rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub module: String,
    pub input_type: String,
    pub output_type: String,
    #[serde(default = "default_selectivity")]
    pub selectivity: f64,
}

fn default_selectivity() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub app_id: String,

    #[serde(default)]
    pub modules: Vec<AppModule>,

    #[serde(default)]
    pub edges: Vec<AppEdge>,

    #[serde(default)]
    pub mappings: Vec<MappingConfig>,

    /// Control loops as node-name sequences
    #[serde(default)]
    pub loops: Vec<Vec<String>>,

    /// Defaults to edge-ward placement
    #[serde(default)]
    pub placement: PlacementPolicy,
}

impl ApplicationConfig {
    /// Builds the (not yet validated) application.
    pub fn to_application(&self) -> ConfigResult<Application> {
        let mut app = Application::new(self.app_id.clone());
        for module in &self.modules {
            app.add_module_with_size(module.name.clone(), module.mips, module.ram, module.bw, module.size)?;
        }
        for edge in &self.edges {
            app.add_edge(edge.clone());
        }
        for mapping in &self.mappings {
            app.add_tuple_mapping(
                mapping.module.clone(),
                mapping.input_type.clone(),
                mapping.output_type.clone(),
                Selectivity::Fractional(mapping.selectivity),
            )?;
        }
        app.set_loops(self.loops.iter().map(|l| ControlLoop::new(l.iter().cloned())).collect());
        Ok(app)
    }
}

/// Complete scenario configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Global simulation parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub actuators: Vec<ActuatorConfig>,

    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

impl ScenarioConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: ScenarioConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: ScenarioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Checks cross references between sections.
    ///
    /// Topology and placement problems inside an application are reported
    /// by [`build`](Self::build) as [`ConfigError::Model`].
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.simulation.max_time > 0.0) {
            return Err(ConfigError::Validation(format!(
                "max_time must be positive, got {}",
                self.simulation.max_time
            )));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate device name: {}",
                    device.name
                )));
            }
        }

        let roots: Vec<&str> = self
            .devices
            .iter()
            .filter(|d| d.parent.is_none())
            .map(|d| d.name.as_str())
            .collect();
        if !self.devices.is_empty() && roots.len() != 1 {
            return Err(ConfigError::Validation(format!(
                "Exactly one root device is required, found {}: [{}]",
                roots.len(),
                roots.join(", ")
            )));
        }
        for device in &self.devices {
            if let Some(parent) = &device.parent {
                if !names.contains(parent.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "Device '{}' references non-existent parent: {}",
                        device.name, parent
                    )));
                }
            }
        }

        let mut app_ids = HashSet::new();
        for app in &self.applications {
            if !app_ids.insert(app.app_id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate application ID: {}",
                    app.app_id
                )));
            }
        }

        for sensor in &self.sensors {
            if !names.contains(sensor.gateway.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Sensor '{}' references non-existent gateway: {}",
                    sensor.name, sensor.gateway
                )));
            }
            if let Some(interval) = sensor.interval {
                if !(interval > 0.0) {
                    return Err(ConfigError::Validation(format!(
                        "Sensor '{}' has a non-positive interval",
                        sensor.name
                    )));
                }
            }
            if !app_ids.contains(sensor.app_id.as_str()) {
                tracing::warn!(
                    "Sensor '{}' belongs to unknown application '{}' (its tuples will be unrouted)",
                    sensor.name,
                    sensor.app_id
                );
            }
        }

        for actuator in &self.actuators {
            if !names.contains(actuator.gateway.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Actuator '{}' references non-existent gateway: {}",
                    actuator.name, actuator.gateway
                )));
            }
        }

        Ok(())
    }

    /// Builds the device hierarchy with its sensors and actuators.
    pub fn build_hierarchy(&self) -> ConfigResult<DeviceHierarchy> {
        let mut hierarchy = DeviceHierarchy::new();

        // Parents must exist before their children; devices may be listed in
        // any order.
        let mut pending: Vec<&DeviceConfig> = self.devices.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for device in pending {
                let parent = match &device.parent {
                    None => None,
                    Some(name) => match hierarchy.device_by_name(name) {
                        Some(parent) => Some(parent.id),
                        None => {
                            deferred.push(device);
                            continue;
                        }
                    },
                };
                hierarchy.add_device(device.spec(), parent)?;
            }
            if deferred.len() == before {
                return Err(ConfigError::Validation(format!(
                    "Device '{}' is not connected to the root",
                    deferred[0].name
                )));
            }
            pending = deferred;
        }

        let gateway_id = |hierarchy: &DeviceHierarchy, owner: &str, gateway: &str| {
            hierarchy.device_by_name(gateway).map(|d| d.id).ok_or_else(|| {
                ConfigError::Validation(format!("'{}' references non-existent gateway: {}", owner, gateway))
            })
        };
        for sensor in &self.sensors {
            let gateway = gateway_id(&hierarchy, &sensor.name, &sensor.gateway)?;
            hierarchy.add_sensor(
                sensor.name.clone(),
                sensor.tuple_type.clone(),
                sensor.app_id.clone(),
                gateway,
                sensor.latency,
                sensor.interval,
            )?;
        }
        for actuator in &self.actuators {
            let gateway = gateway_id(&hierarchy, &actuator.name, &actuator.gateway)?;
            hierarchy.add_actuator(
                actuator.name.clone(),
                actuator.actuator_type.clone(),
                actuator.app_id.clone(),
                gateway,
                actuator.latency,
            )?;
        }
        Ok(hierarchy)
    }

    /// Builds a ready-to-run simulation with every application submitted.
    pub fn build(&self) -> ConfigResult<FogSimulation> {
        self.validate()?;
        let hierarchy = self.build_hierarchy()?;
        let mut sim = FogSimulation::new(hierarchy, self.simulation.max_time)
            .with_name(self.simulation.name.clone());
        for app_config in &self.applications {
            let app = app_config.to_application()?;
            sim.submit_application(app, &app_config.placement)?;
        }
        Ok(sim)
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn find_device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn find_application(&self, app_id: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.app_id == app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::ModuleMapping;

    const SCENARIO: &str = r#"
simulation:
  name: monitor
  max_time: 100
  log_level: debug

devices:
  - name: gw
    parent: cloud
    mips: 1000
    ram: 1000
    uplink_bandwidth: 1000
    downlink_bandwidth: 1000
    uplink_latency: 4
  - name: cloud
    mips: 4000
    ram: 4000
    uplink_bandwidth: 1000
    downlink_bandwidth: 1000

sensors:
  - name: s-0
    tuple_type: S
    app_id: app
    gateway: gw
    latency: 1
    interval: 10

actuators:
  - name: a-0
    actuator_type: A
    app_id: app
    gateway: gw
    latency: 1

applications:
  - app_id: app
    modules:
      - { name: m, mips: 100, ram: 10, bw: 10 }
    edges:
      - { source: S, destination: m, tuple_type: S, direction: up, kind: sensor, cpu_length: 1000, network_length: 0 }
      - { source: m, destination: A, tuple_type: OUT, direction: actuator, kind: actuator, cpu_length: 0, network_length: 0 }
    mappings:
      - { module: m, input_type: S, output_type: OUT }
    loops:
      - [S, m, A]
"#;

    #[test]
    fn test_default_config() {
        let config = ScenarioConfig::new();
        assert_eq!(config.simulation.max_time, 10_000.0);
        assert_eq!(config.simulation.log_level, "info");
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_yaml_parsing() {
        let config = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        assert_eq!(config.simulation.name, "monitor");
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.find_device("gw").unwrap().uplink_latency, 4.0);

        let app = config.find_application("app").unwrap();
        assert_eq!(app.mappings[0].selectivity, 1.0);
        assert_eq!(app.placement, PlacementPolicy::edge_ward());
        assert_eq!(app.loops[0], vec!["S", "m", "A"]);
    }

    #[test]
    fn test_build_and_run() {
        let config = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        let mut sim = config.build().unwrap();
        let stats = sim.run();

        // emissions at 10..=100; the one at 100 completes after the deadline
        assert_eq!(stats.routing.actuator_deliveries, 9);
        assert_eq!(sim.loop_average("app", 0), Some(3.0));
        assert_eq!(stats.placements["app"]["m"], "gw");
    }

    #[test]
    fn test_json_parsing_with_explicit_placement() {
        let json = r#"{
            "devices": [
                {"name": "cloud", "mips": 1000, "ram": 100, "uplink_bandwidth": 10, "downlink_bandwidth": 10}
            ],
            "applications": [
                {
                    "app_id": "app",
                    "modules": [{"name": "m", "mips": 10, "ram": 1, "bw": 1}],
                    "edges": [{"source": "S", "destination": "m", "tuple_type": "S", "direction": "up", "kind": "sensor", "cpu_length": 1, "network_length": 1}],
                    "placement": {"policy": "explicit", "mapping": {"cloud": ["m"]}}
                }
            ]
        }"#;

        let config = ScenarioConfig::from_json(json).unwrap();
        assert_eq!(
            config.applications[0].placement,
            PlacementPolicy::explicit(ModuleMapping::new().with("m", "cloud"))
        );
        let sim = config.build().unwrap();
        assert!(sim.placement("app").unwrap().device_of("m").is_some());
    }

    #[test]
    fn test_validation_duplicate_device() {
        let yaml = r#"
devices:
  - { name: cloud, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
  - { name: cloud, parent: cloud, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
"#;
        assert!(matches!(ScenarioConfig::from_yaml(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_two_roots() {
        let yaml = r#"
devices:
  - { name: a, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
  - { name: b, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
"#;
        assert!(matches!(ScenarioConfig::from_yaml(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_unknown_gateway() {
        let yaml = r#"
devices:
  - { name: cloud, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
sensors:
  - { name: s, tuple_type: S, app_id: app, gateway: nowhere }
"#;
        assert!(matches!(ScenarioConfig::from_yaml(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parent_cycle_is_rejected_at_build() {
        let yaml = r#"
devices:
  - { name: root, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
  - { name: a, parent: b, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
  - { name: b, parent: a, mips: 1, ram: 1, uplink_bandwidth: 1, downlink_bandwidth: 1 }
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.build_hierarchy(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_model_errors_surface_at_build() {
        let mut config = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        config.applications[0].placement = PlacementPolicy::explicit(ModuleMapping::new());

        let err = config.build().err().unwrap();
        assert!(matches!(err, ConfigError::Model(FogError::IncompletePlacement { .. })));
    }

    #[test]
    fn test_duplicate_module_in_file_is_rejected() {
        let mut config = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        let module = config.applications[0].modules[0].clone();
        config.applications[0].modules.push(module);

        let err = config.applications[0].to_application().unwrap_err();
        assert!(matches!(err, ConfigError::Model(FogError::DuplicateModule { .. })));
        assert!(matches!(
            config.build().err(),
            Some(ConfigError::Model(FogError::DuplicateModule { .. }))
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        let yaml = config.to_yaml().unwrap();
        let restored = ScenarioConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, restored);

        let json = config.to_json().unwrap();
        assert_eq!(ScenarioConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_file_format_detection() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScenarioConfig::from_yaml(SCENARIO).unwrap();

        let yaml_path = dir.path().join("scenario.yml");
        config.to_yaml_file(&yaml_path).unwrap();
        assert_eq!(ScenarioConfig::from_file(&yaml_path).unwrap(), config);

        let json_path = dir.path().join("scenario.json");
        config.to_json_file(&json_path).unwrap();
        assert_eq!(ScenarioConfig::from_file(&json_path).unwrap(), config);

        let other = dir.path().join("scenario.toml");
        std::fs::write(&other, "").unwrap();
        assert!(matches!(ScenarioConfig::from_file(&other), Err(ConfigError::UnknownFormat(_))));
    }
}
