//! Core type definitions for the simulation framework.
//!
//! This module defines the fundamental types used throughout the placement
//! resolver, the tuple router and the latency tracker.

/// Simulation time unit.
///
/// Fractional so that transmission delays (`network_length / bandwidth`) and
/// processing delays (`cpu_length / mips`) are represented exactly as computed.
pub type SimTime = f64;

/// Identifier of any entity that can receive scheduled events.
///
/// Devices, sensors and actuators share one identifier space allocated by the
/// [`DeviceHierarchy`](crate::device::DeviceHierarchy).
pub type EntityId = u32;

/// Identifier of a compute device in the hierarchy.
pub type DeviceId = EntityId;

/// Unique identifier of a tuple instance within one simulation run.
pub type TupleId = u64;
