//! Observer hooks on the tuple lifecycle.
//!
//! Modules do not override routing behaviour. Instead, a [`TupleListener`]
//! is registered for a module and the router calls it at two fixed points:
//! when a tuple arrives at the module and when the module finishes
//! processing it.

use crate::tuple::Tuple;
use crate::types::SimTime;

/// Callbacks invoked by the [`TupleRouter`](crate::router::TupleRouter).
///
/// Both methods default to doing nothing, so a listener only implements the
/// hook it cares about.
pub trait TupleListener: Send {
    /// A tuple has been delivered to `module`, before it is queued or executed.
    fn on_arrival(&mut self, _module: &str, _tuple: &Tuple, _time: SimTime) {}

    /// `module` has finished processing a tuple, before its outputs are routed.
    fn on_completion(&mut self, _module: &str, _tuple: &Tuple, _time: SimTime) {}
}
