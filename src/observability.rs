use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transition engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub transitions_applied: AtomicU64,
    pub quiescent_advances: AtomicU64,
    pub processor_failures: AtomicU64,
    pub processor_timeouts: AtomicU64,
    pub ambiguity_warnings: AtomicU64,
    pub state_conflicts: AtomicU64,
    pub entities_instantiated: AtomicU64,
    pub processor_time_ms: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transition(&self) {
        self.transitions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quiescent(&self) {
        self.quiescent_advances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processor_failure(&self, timed_out: bool) {
        self.processor_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.processor_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wall time spent inside processors, failed calls included
    pub fn record_processor_time(&self, elapsed: Duration) {
        self.processor_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_ambiguity(&self) {
        self.ambiguity_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.state_conflicts.fetch_add(1, Ordering::Relaxed);
        warn!("Entity state changed underneath a transition");
    }

    pub fn record_instantiation(&self) {
        self.entities_instantiated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
            quiescent_advances: self.quiescent_advances.load(Ordering::Relaxed),
            processor_failures: self.processor_failures.load(Ordering::Relaxed),
            processor_timeouts: self.processor_timeouts.load(Ordering::Relaxed),
            ambiguity_warnings: self.ambiguity_warnings.load(Ordering::Relaxed),
            state_conflicts: self.state_conflicts.load(Ordering::Relaxed),
            entities_instantiated: self.entities_instantiated.load(Ordering::Relaxed),
            processor_time_ms: self.processor_time_ms.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            transitions = stats.transitions_applied,
            quiescent = stats.quiescent_advances,
            failures = stats.processor_failures,
            timeouts = stats.processor_timeouts,
            ambiguous = stats.ambiguity_warnings,
            conflicts = stats.state_conflicts,
            instantiated = stats.entities_instantiated,
            processor_time_ms = stats.processor_time_ms,
            "Engine metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub transitions_applied: u64,
    pub quiescent_advances: u64,
    pub processor_failures: u64,
    pub processor_timeouts: u64,
    pub ambiguity_warnings: u64,
    pub state_conflicts: u64,
    pub entities_instantiated: u64,
    pub processor_time_ms: u64,
}

/// Global metrics instance
static ENGINE_METRICS: std::sync::LazyLock<EngineMetrics> =
    std::sync::LazyLock::new(EngineMetrics::new);

pub fn engine_metrics() -> &'static EngineMetrics {
    &ENGINE_METRICS
}

/// Measures one unit of work, such as a processor call
pub struct OperationTimer {
    kind: &'static str,
    name: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Log the elapsed time and hand it back for accounting
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        debug!(
            kind = self.kind,
            name = %self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timed operation finished"
        );
        elapsed
    }
}
