//! Hypotension Detection Example
//!
//! Eight blood-pressure sensors, split over two edge gateways, feed a client
//! module that forwards readings to a detector and drives a display with
//! the result. The same scenario is run under one placement policy:
//!
//! - `edge` (default): both modules pinned to `edge-gateway-1`
//! - `auto`: unpinned edge-ward placement
//! - `cloud`: both modules on the cloud, with sensors and displays reached
//!   over a 50 unit link
//!
//! Run with: `cargo run --example hypotension -- [edge|auto|cloud] [scenario.yaml]`

use std::env;
use std::error::Error;

use fogloop::config::ScenarioConfig;
use fogloop::placement::{ModuleMapping, PlacementPolicy};

const APP: &str = "HypotensionApp";
const CLOUD_ENDPOINT_LATENCY: f64 = 50.0;
const DEFAULT_SCENARIO: &str = include_str!("hypotension.yaml");

fn both_on(device: &str) -> ModuleMapping {
    ModuleMapping::new()
        .with("clientModule", device)
        .with("hypotensionDetector", device)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("edge");

    let mut config = match args.get(1) {
        Some(path) => ScenarioConfig::from_file(path)?,
        None => ScenarioConfig::from_yaml(DEFAULT_SCENARIO)?,
    };
    fogloop::init_logging(&config.simulation.log_level);

    let policy = match mode {
        "edge" => PlacementPolicy::edge_ward_with(both_on("edge-gateway-1")),
        "auto" => PlacementPolicy::edge_ward(),
        "cloud" => PlacementPolicy::explicit(both_on("cloud")),
        other => return Err(format!("unknown mode '{}', expected edge, auto or cloud", other).into()),
    };
    for app in config.applications.iter_mut().filter(|a| a.app_id == APP) {
        app.placement = policy.clone();
    }
    if mode == "cloud" {
        for sensor in config.sensors.iter_mut().filter(|s| s.app_id == APP) {
            sensor.latency = CLOUD_ENDPOINT_LATENCY;
        }
        for actuator in config.actuators.iter_mut().filter(|a| a.app_id == APP) {
            actuator.latency = CLOUD_ENDPOINT_LATENCY;
        }
    }

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║           Hypotension Detection Example                  ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!("  Mode:        {}", mode);
    println!("  Devices:     {}", config.devices.len());
    println!("  Sensors:     {}", config.sensors.len());
    println!("  Max time:    {}", config.simulation.max_time);
    println!();

    let mut sim = config.build()?;
    let stats = sim.run();

    // ========================================================================
    // Results
    // ========================================================================
    println!("Placement:");
    for (app_id, modules) in &stats.placements {
        for (module, device) in modules {
            println!("  {}/{} -> {}", app_id, module, device);
        }
    }

    println!();
    println!("Application loop delays:");
    if stats.latency.loops.is_empty() {
        println!("  no loop delay recorded");
    }
    for (loop_id, record) in &stats.latency.loops {
        if let Some(mean) = record.value() {
            println!("  {:<24} {:>10.3} ({} closures)", loop_id, mean, record.count);
        }
    }

    println!();
    println!("Tuple CPU execution delay:");
    for (tuple_type, record) in &stats.latency.tuple_cpu {
        if let Some(mean) = record.value() {
            println!("  {:<24} {:>10.4}", tuple_type, mean);
        }
    }

    println!();
    println!("Device utilisation:");
    for (device, usage) in &stats.devices {
        if usage.executed > 0 {
            println!(
                "  {:<24} {:>8} tuples, busy {:.1}%",
                device,
                usage.executed,
                100.0 * usage.busy_time / stats.engine.final_time.max(f64::MIN_POSITIVE)
            );
        }
    }

    println!();
    println!(
        "Network usage: {:.2} per time unit",
        stats.routing.network_bytes / stats.engine.max_time
    );
    println!(
        "Unrouted tuples: {}, deadline misses: {}",
        stats.routing.unrouted_tuples, stats.routing.deadline_misses
    );
    println!(
        "Wall time: {:.1} ms ({:.0} events/s)",
        stats.timing.total_wall_time_ms, stats.timing.events_per_second
    );

    if let Ok(path) = env::var("FOGLOOP_STATS") {
        stats.to_json_file(&path)?;
        println!("Statistics written to {}", path);
    }
    Ok(())
}
