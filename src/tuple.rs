//! Tuples: the units of traffic routed through a placed application.

use serde::{Deserialize, Serialize};

use crate::application::Direction;
use crate::types::{EntityId, SimTime, TupleId};

/// One node visited by a logical flow, with the time the flow reached it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub node: String,
    pub time: SimTime,
}

/// A tuple instance.
///
/// Lifecycle: created at a sensor or by a module's selectivity mapping, in
/// transit along an edge, delivered to a module (possibly queued), executed,
/// and finally consumed by the module's mappings or by an actuator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub id: TupleId,
    pub app_id: String,
    pub tuple_type: String,
    /// Emitting module, or the sensor tuple type for sensor tuples
    pub src: String,
    /// Destination module or actuator type
    pub dst: String,
    pub direction: Direction,
    pub cpu_length: f64,
    pub network_length: f64,
    /// Sensor whose emission started this flow
    pub origin: Option<EntityId>,
    pub created_at: SimTime,
    pub deadline: Option<SimTime>,
    /// Trailing nodes visited by this flow, oldest first
    pub provenance: Vec<Hop>,
}

impl Tuple {
    /// Records a visit to `node`, keeping at most `limit` trailing hops.
    pub fn push_hop(&mut self, node: impl Into<String>, time: SimTime, limit: usize) {
        self.provenance.push(Hop {
            node: node.into(),
            time,
        });
        if self.provenance.len() > limit {
            let excess = self.provenance.len() - limit;
            self.provenance.drain(..excess);
        }
    }

    /// Time at which the trailing hops equal `sequence`, if they do.
    pub fn trailing_match(&self, sequence: &[String]) -> Option<SimTime> {
        if sequence.is_empty() || self.provenance.len() < sequence.len() {
            return None;
        }
        let tail = &self.provenance[self.provenance.len() - sequence.len()..];
        tail.iter()
            .zip(sequence)
            .all(|(hop, name)| &hop.node == name)
            .then(|| tail[0].time)
    }

    /// Returns true if delivery at `now` is later than the tuple's deadline.
    pub fn missed_deadline(&self, now: SimTime) -> bool {
        self.deadline
            .map(|d| now - self.created_at > d)
            .unwrap_or(false)
    }
}
