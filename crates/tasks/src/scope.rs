//! Per-task parameter overrides over a shared parameter store.
//!
//! The store holds the process-wide processing parameters. A task applies its
//! overrides through [`ParameterStore::apply`], which returns a
//! [`ConfigurationScope`]. The scope:
//!
//! - layers its overrides over the store without blocking other tasks, even
//!   ones overriding the same keys;
//! - exposes an immutable [`Parameters`] view (base values plus this task's
//!   overrides) that is passed explicitly to extraction and generation;
//! - removes its layer on [`ConfigurationScope::restore`] or, failing that, on
//!   drop. A key then reads as the newest remaining override, or the base
//!   value once no task overrides it.

use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use tracing::debug;

use docproc_core::config::LlmConfig;
use docproc_ingest::ExtractOptions;
use docproc_llm::GenerationParams;

use crate::types::{ParameterMap, TaskId};

pub const TEMPERATURE: &str = "temperature";
pub const MAX_TOKENS: &str = "max_tokens";
pub const TOP_P: &str = "top_p";
pub const FREQUENCY_PENALTY: &str = "frequency_penalty";
pub const PRESENCE_PENALTY: &str = "presence_penalty";
pub const MODEL: &str = "model";
pub const MAX_TEXT_CHARS: &str = "max_text_chars";

// ── Parameters ────────────────────────────────────────────────

/// An immutable set of effective parameters for one task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters(ParameterMap);

impl Parameters {
    pub fn new(map: ParameterMap) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn as_map(&self) -> &ParameterMap {
        &self.0
    }

    fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.get(key).and_then(Value::as_f64).map(|v| v as f32).unwrap_or(default)
    }

    pub fn generation_params(&self) -> GenerationParams {
        let defaults = GenerationParams::default();
        GenerationParams {
            model: self.get(MODEL).and_then(Value::as_str).map(str::to_string),
            temperature: self.f32_or(TEMPERATURE, defaults.temperature),
            max_tokens: self
                .get(MAX_TOKENS)
                .and_then(Value::as_u64)
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_tokens),
            top_p: self.f32_or(TOP_P, defaults.top_p),
            frequency_penalty: self.f32_or(FREQUENCY_PENALTY, defaults.frequency_penalty),
            presence_penalty: self.f32_or(PRESENCE_PENALTY, defaults.presence_penalty),
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            max_chars: self.get(MAX_TEXT_CHARS).and_then(Value::as_u64).map(|v| v as usize),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

/// Shared processing parameters. The key set is fixed at construction.
pub struct ParameterStore {
    base: ParameterMap,
    state: RwLock<StoreState>,
}

/// Current values plus the override layers that produced them, oldest first.
#[derive(Default)]
struct StoreState {
    current: ParameterMap,
    layers: Vec<(TaskId, ParameterMap)>,
}

impl StoreState {
    /// Recompute `keys` from the newest layer that sets them.
    fn settle<'a>(&mut self, base: &ParameterMap, keys: impl Iterator<Item = &'a String>) {
        for key in keys {
            let value = self
                .layers
                .iter()
                .rev()
                .find_map(|(_, layer)| layer.get(key))
                .or_else(|| base.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            self.current.insert(key.clone(), value);
        }
    }
}

impl ParameterStore {
    pub fn new(base: ParameterMap) -> Self {
        Self {
            state: RwLock::new(StoreState {
                current: base.clone(),
                layers: Vec::new(),
            }),
            base,
        }
    }

    /// Seed from the LLM defaults. `model` and `max_text_chars` start unset.
    pub fn from_config(llm: &LlmConfig) -> Self {
        let mut base = ParameterMap::new();
        base.insert(TEMPERATURE.into(), json!(widen(llm.temperature)));
        base.insert(MAX_TOKENS.into(), json!(llm.max_tokens));
        base.insert(TOP_P.into(), json!(widen(llm.top_p)));
        base.insert(FREQUENCY_PENALTY.into(), json!(0.0));
        base.insert(PRESENCE_PENALTY.into(), json!(0.0));
        base.insert(MODEL.into(), Value::Null);
        base.insert(MAX_TEXT_CHARS.into(), Value::Null);
        Self::new(base)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.base.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().current.get(key).cloned()
    }

    /// Current contents, including any active overrides.
    pub fn snapshot(&self) -> ParameterMap {
        self.read().current.clone()
    }

    /// Number of scopes that have applied and not yet restored.
    pub fn active_scopes(&self) -> usize {
        self.read().layers.len()
    }

    /// Values with no overrides applied.
    pub fn base(&self) -> &ParameterMap {
        &self.base
    }

    /// Base values overlaid with the known keys of `requested`.
    pub fn effective_for(&self, requested: &ParameterMap) -> ParameterMap {
        let mut effective = self.base.clone();
        for (key, value) in requested {
            if self.contains(key) {
                effective.insert(key.clone(), value.clone());
            }
        }
        effective
    }

    /// Apply `requested` on behalf of `task_id`. Unknown keys are ignored.
    ///
    /// Never waits: the task's own values travel in the scope's
    /// [`effective`](ConfigurationScope::effective) snapshot, so scopes that
    /// override the same key may be active at the same time.
    pub fn apply(self: &Arc<Self>, task_id: TaskId, requested: &ParameterMap) -> ConfigurationScope {
        let mut applied = ParameterMap::new();
        for (key, value) in requested {
            if self.contains(key) {
                applied.insert(key.clone(), value.clone());
            } else {
                debug!(task_id = %task_id, key = %key, "ignoring unknown parameter");
            }
        }

        let mut original = ParameterMap::new();
        {
            let mut state = self.write();
            for (key, value) in &applied {
                if let Some(prev) = state.current.insert(key.clone(), value.clone()) {
                    original.insert(key.clone(), prev);
                }
            }
            state.layers.push((task_id, applied.clone()));
        }

        let effective = self.effective_for(&applied);

        debug!(task_id = %task_id, keys = applied.len(), "configuration scope applied");
        ConfigurationScope {
            store: Arc::clone(self),
            owner_task: task_id,
            original,
            applied,
            effective: Parameters(effective),
            restored: false,
        }
    }

    fn remove_layer(&self, task_id: TaskId, keys: &ParameterMap) {
        let mut state = self.write();
        if let Some(idx) = state.layers.iter().position(|(id, _)| *id == task_id) {
            state.layers.remove(idx);
        }
        state.settle(&self.base, keys.keys());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// `0.7f32 as f64` is 0.699999988; keep the value as configured.
fn widen(v: f32) -> f64 {
    (f64::from(v) * 1e6).round() / 1e6
}

// ── Scope ─────────────────────────────────────────────────────

/// One task's applied overrides. Restores the store exactly once.
pub struct ConfigurationScope {
    store: Arc<ParameterStore>,
    owner_task: TaskId,
    original: ParameterMap,
    applied: ParameterMap,
    effective: Parameters,
    restored: bool,
}

impl ConfigurationScope {
    pub fn owner_task(&self) -> TaskId {
        self.owner_task
    }

    /// Values the store held just before the overrides were written.
    pub fn original(&self) -> &ParameterMap {
        &self.original
    }

    /// Overrides that were actually applied (unknown keys dropped).
    pub fn applied(&self) -> &ParameterMap {
        &self.applied
    }

    /// Base values plus this task's overrides.
    pub fn effective(&self) -> &Parameters {
        &self.effective
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Remove this task's overrides from the store. Idempotent.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        self.store.remove_layer(self.owner_task, &self.applied);
        debug!(task_id = %self.owner_task, keys = self.original.len(), "configuration scope restored");
    }
}

impl Drop for ConfigurationScope {
    fn drop(&mut self) {
        self.restore();
    }
}
