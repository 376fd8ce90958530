use std::sync::Mutex;

use serde::Serialize;

/// Fallback total when the platform exposes no memory information (8 GB).
const FALLBACK_TOTAL_MB: u64 = 8 * 1024;

/// Point-in-time memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemorySnapshot {
    pub total_mb: u64,
    pub available_mb: u64,
    pub used_percent: f64,
}

impl MemorySnapshot {
    pub fn from_totals(total_mb: u64, available_mb: u64) -> Self {
        let available_mb = available_mb.min(total_mb);
        let used_percent = if total_mb == 0 {
            0.0
        } else {
            (total_mb - available_mb) as f64 * 100.0 / total_mb as f64
        };
        Self {
            total_mb,
            available_mb,
            used_percent,
        }
    }
}

/// Source of memory readings for admission decisions.
pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Reads `/proc/meminfo`. Elsewhere reports a fixed 8 GB with nothing used.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> MemorySnapshot {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|contents| parse_meminfo(&contents))
            .unwrap_or_else(|| MemorySnapshot::from_totals(FALLBACK_TOTAL_MB, FALLBACK_TOTAL_MB))
    }
}

/// Parse `MemTotal` and `MemAvailable` (kB) from meminfo text.
fn parse_meminfo(contents: &str) -> Option<MemorySnapshot> {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in contents.lines() {
        // Format: "MemTotal:       16384000 kB"
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total_kb = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => available_kb = parts.next().and_then(|v| v.parse::<u64>().ok()),
            _ => {}
        }
    }
    let total_kb = total_kb?;
    // Old kernels lack MemAvailable; assume nothing is free rather than everything.
    let available_kb = available_kb.unwrap_or(0);
    Some(MemorySnapshot::from_totals(total_kb / 1024, available_kb / 1024))
}

/// Probe with a settable reading.
#[derive(Debug)]
pub struct FixedMemoryProbe {
    reading: Mutex<MemorySnapshot>,
}

impl FixedMemoryProbe {
    pub fn new(total_mb: u64, used_percent: f64) -> Self {
        Self {
            reading: Mutex::new(Self::reading(total_mb, used_percent)),
        }
    }

    pub fn set_used_percent(&self, used_percent: f64) {
        let mut reading = self.reading.lock().unwrap_or_else(|e| e.into_inner());
        *reading = Self::reading(reading.total_mb, used_percent);
    }

    fn reading(total_mb: u64, used_percent: f64) -> MemorySnapshot {
        let used_percent = used_percent.clamp(0.0, 100.0);
        let available_mb = (total_mb as f64 * (100.0 - used_percent) / 100.0) as u64;
        MemorySnapshot {
            total_mb,
            available_mb,
            used_percent,
        }
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn snapshot(&self) -> MemorySnapshot {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner())
    }
}
