//! Error taxonomy for topology construction, hierarchy construction and
//! placement resolution.
//!
//! Every variant is raised before the first event is scheduled. Problems found
//! while routing tuples are never errors; they are counted as unrouted-tuple
//! anomalies by the [`TupleRouter`](crate::router::TupleRouter).

use thiserror::Error;

use crate::types::DeviceId;

/// Errors raised while building an application, a device hierarchy, or while
/// resolving a placement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FogError {
    #[error("module '{module}' already exists in application '{app_id}'")]
    DuplicateModule { app_id: String, module: String },

    #[error("dangling edge {source_node} -> {destination} ({tuple_type}) in application '{app_id}': {reason}")]
    DanglingEdge {
        app_id: String,
        source_node: String,
        destination: String,
        tuple_type: String,
        reason: String,
    },

    #[error("selectivity for {module}:{input_type} -> {output_type} must be a finite non-negative fraction, got {fraction}")]
    InvalidSelectivity {
        module: String,
        input_type: String,
        output_type: String,
        fraction: f64,
    },

    #[error("control loop #{index} of application '{app_id}' has no edge between '{from}' and '{to}'")]
    InvalidControlLoop {
        app_id: String,
        index: usize,
        from: String,
        to: String,
    },

    #[error("device '{device}' cannot be attached to parent {parent}: parent does not exist or would form a cycle")]
    Cycle { device: String, parent: DeviceId },

    #[error("device name '{0}' is already registered")]
    DuplicateDevice(String),

    #[error("device '{device}' has no parent but '{root}' is already the root")]
    MultipleRoots { device: String, root: String },

    #[error("device '{device}' is invalid: {reason}")]
    InvalidDevice { device: String, reason: String },

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown application: {0}")]
    UnknownApplication(String),

    #[error("application '{0}' has already been submitted")]
    DuplicateApplication(String),

    #[error("application '{0}' submitted after the simulation started")]
    SubmittedAfterStart(String),

    #[error("incomplete placement for module '{module}' of application '{app_id}': {reason}")]
    IncompletePlacement {
        app_id: String,
        module: String,
        reason: String,
    },

    #[error("no device on the path to the root can host module '{module}' of application '{app_id}' (needs {mips} MIPS, {ram} RAM)")]
    InsufficientCapacity {
        app_id: String,
        module: String,
        mips: f64,
        ram: u64,
    },
}

/// Result type for model construction and placement.
pub type FogResult<T> = Result<T, FogError>;
