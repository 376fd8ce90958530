//! Admission control: how many tasks may run at once.
//!
//! Capacity is derived once from total memory. Each running task holds an
//! [`AdmissionPermit`]; dropping the permit frees the slot, so a slot cannot
//! leak on any exit path. Independent of capacity, a memory circuit breaker
//! denies every request while used memory is at or above the threshold.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::memory::{MemoryProbe, MemorySnapshot};

/// Share of total memory tasks may claim.
const USABLE_MEMORY_FRACTION: f64 = 0.7;

/// `min(ceiling, max(1, floor(total * 0.7 / per_task)))`.
pub fn compute_capacity(total_memory_mb: u64, per_task_mb: u64, ceiling: usize) -> usize {
    let per_task = per_task_mb.max(1) as f64;
    let fit = (total_memory_mb as f64 * USABLE_MEMORY_FRACTION / per_task).floor() as usize;
    fit.max(1).min(ceiling)
}

/// True when memory pressure should stop all admissions.
pub fn circuit_open(memory_used_percent: f64, threshold: f64) -> bool {
    memory_used_percent >= threshold
}

/// Why a slot was refused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Denial {
    AtCapacity { active: usize, capacity: usize },
    CircuitOpen { used_percent: f64 },
}

pub struct AdmissionController {
    capacity: usize,
    ceiling: usize,
    threshold: f64,
    active: Mutex<usize>,
    probe: Arc<dyn MemoryProbe>,
    released: Notify,
}

impl AdmissionController {
    /// Compute capacity from the probe's current total memory.
    pub fn new(probe: Arc<dyn MemoryProbe>, per_task_mb: u64, ceiling: usize, threshold: f64) -> Self {
        let total = probe.snapshot().total_mb;
        let capacity = compute_capacity(total, per_task_mb, ceiling);
        if capacity < ceiling {
            warn!(
                capacity,
                ceiling,
                total_mb = total,
                per_task_mb,
                "admission capacity limited by available memory"
            );
        }
        Self::with_capacity(probe, capacity, ceiling, threshold)
    }

    pub fn with_capacity(probe: Arc<dyn MemoryProbe>, capacity: usize, ceiling: usize, threshold: f64) -> Self {
        Self {
            capacity,
            ceiling,
            threshold,
            active: Mutex::new(0),
            probe,
            released: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured hard ceiling, before memory limits were applied.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn active(&self) -> usize {
        *self.lock_active()
    }

    pub fn memory(&self) -> MemorySnapshot {
        self.probe.snapshot()
    }

    pub fn is_circuit_open(&self) -> bool {
        circuit_open(self.memory().used_percent, self.threshold)
    }

    /// Whether a `try_acquire` would be granted right now.
    pub fn has_free_slot(&self) -> bool {
        *self.lock_active() < self.capacity && !self.is_circuit_open()
    }

    /// Claim a slot if one is free and the circuit is closed.
    pub fn try_acquire(self: &Arc<Self>) -> Result<AdmissionPermit, Denial> {
        let used_percent = self.memory().used_percent;
        if circuit_open(used_percent, self.threshold) {
            debug!(used_percent, "admission denied: circuit open");
            return Err(Denial::CircuitOpen { used_percent });
        }

        let mut active = self.lock_active();
        if *active >= self.capacity {
            return Err(Denial::AtCapacity {
                active: *active,
                capacity: self.capacity,
            });
        }
        *active += 1;
        debug!(active = *active, capacity = self.capacity, "admission granted");
        Ok(AdmissionPermit {
            controller: Arc::clone(self),
            released: false,
        })
    }

    /// Resolves after some permit is released.
    pub fn released(&self) -> &Notify {
        &self.released
    }

    fn release(&self) {
        {
            let mut active = self.lock_active();
            *active = active.saturating_sub(1);
        }
        self.released.notify_one();
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One admission slot. Released exactly once, explicitly or on drop.
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    released: bool,
}

impl AdmissionPermit {
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.controller.release();
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("released", &self.released)
            .finish()
    }
}
