use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use docproc_core::config::CircuitPolicy;

use crate::memory::MemorySnapshot;
use crate::types::StatusCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Everything [`evaluate`] looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInputs {
    pub api_enabled: bool,
    pub circuit_open: bool,
    pub circuit_policy: CircuitPolicy,
    pub has_free_slot: bool,
    pub queue_full: bool,
    pub capacity: usize,
    pub ceiling: usize,
    pub dependencies_up: bool,
}

/// Unhealthy when no new task could be accepted, degraded when running
/// below full strength, healthy otherwise.
pub fn evaluate(inputs: &HealthInputs) -> HealthStatus {
    let rejecting = inputs.circuit_open && inputs.circuit_policy == CircuitPolicy::Reject;
    let saturated = inputs.queue_full && !inputs.has_free_slot;
    if !inputs.api_enabled || rejecting || saturated {
        return HealthStatus::Unhealthy;
    }
    if inputs.circuit_open || inputs.capacity < inputs.ceiling || !inputs.dependencies_up {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub active_tasks: usize,
    pub queue_length: usize,
    pub capacity: usize,
    pub memory_usage: MemorySnapshot,
    pub circuit_open: bool,
    /// Dependency name to `"up"` or `"down"`.
    pub services: BTreeMap<String, String>,
    pub tasks: StatusCounts,
}
