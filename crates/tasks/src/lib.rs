//! Task orchestration and admission control for document-processing requests.
//!
//! A request becomes a [`Task`] in the [`TaskRegistry`]. The
//! [`Orchestrator`] runs it right away when the [`AdmissionController`]
//! grants a slot, or parks it in the FIFO [`TaskQueue`] until one frees up.
//! While running, the task's parameter overrides are applied through a
//! [`ConfigurationScope`] that is restored on every exit path.

pub mod admission;
pub mod error;
pub mod health;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod scope;
pub mod types;
pub mod validation;

pub use admission::{circuit_open, compute_capacity, AdmissionController, AdmissionPermit, Denial};
pub use error::TaskError;
pub use health::{evaluate, HealthInputs, HealthReport, HealthStatus};
pub use memory::{FixedMemoryProbe, MemoryProbe, MemorySnapshot, SystemMemoryProbe};
pub use orchestrator::{Collaborators, ConfigView, Orchestrator, OrchestratorSettings};
pub use queue::{QueueEntry, TaskQueue};
pub use rate_limit::RateLimiter;
pub use registry::{TaskRegistry, TransitionFields};
pub use scope::{ConfigurationScope, ParameterStore, Parameters};
pub use types::*;
