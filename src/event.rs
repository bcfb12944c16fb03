//! Event definitions for the simulation framework.
//!
//! Events are the only way state changes: each one is addressed to an entity
//! (device, sensor or actuator) and carries what happened to it.

use serde::{Deserialize, Serialize};

use crate::tuple::Tuple;
use crate::types::{EntityId, SimTime};

/// An event scheduled for a single entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// The simulation time at which this event occurs
    pub time: SimTime,
    /// The entity the event is delivered to
    pub target: EntityId,
    /// What happens
    pub payload: EventPayload,
}

impl Event {
    pub fn new(time: SimTime, target: EntityId, payload: EventPayload) -> Self {
        Self {
            time,
            target,
            payload,
        }
    }
}

/// The payload of an event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EventPayload {
    /// A sensor (the target) emits one tuple.
    SensorEmit,

    /// A periodic sensor (the target) emits one tuple and schedules its next
    /// emission one interval later.
    SensorTick,

    /// A tuple reaches the device (the target) hosting its destination module.
    TupleArrival(Tuple),

    /// A device (the target) finishes processing a tuple.
    ExecutionDone(Tuple),

    /// A tuple reaches an actuator (the target).
    ActuatorArrival(Tuple),

    /// A periodic edge of an application fires on the device (the target)
    /// hosting its source module.
    PeriodicEmit { app_id: String, edge: usize },
}

impl EventPayload {
    /// Returns the carried tuple, if any.
    pub fn tuple(&self) -> Option<&Tuple> {
        match self {
            EventPayload::TupleArrival(t)
            | EventPayload::ExecutionDone(t)
            | EventPayload::ActuatorArrival(t) => Some(t),
            EventPayload::SensorEmit
            | EventPayload::SensorTick
            | EventPayload::PeriodicEmit { .. } => None,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::SensorEmit => "sensor_emit",
            EventPayload::SensorTick => "sensor_tick",
            EventPayload::TupleArrival(_) => "tuple_arrival",
            EventPayload::ExecutionDone(_) => "execution_done",
            EventPayload::ActuatorArrival(_) => "actuator_arrival",
            EventPayload::PeriodicEmit { .. } => "periodic_emit",
        }
    }
}
