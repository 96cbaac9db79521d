// dbbackup/src/metrics.rs
use std::collections::HashMap;
use std::sync::Mutex;

/// Receives pipeline measurements. Implementations must tolerate concurrent callers.
pub trait MetricsSink: Send + Sync {
    fn record_duration(&self, database_type: &str, duration_ms: u64, success: bool);

    fn record_size(&self, database_type: &str, size_bytes: u64);

    fn increment_count(&self, database_type: &str, status: &str);

    fn record_upload_duration(&self, provider: &str, duration_ms: u64);

    fn record_retries(&self, operation: &str, retries: u32);
}

/// Emits every measurement as a `tracing` event on the `dbbackup::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_duration(&self, database_type: &str, duration_ms: u64, success: bool) {
        tracing::info!(target: "dbbackup::metrics", metric = "backup.duration", database_type, duration_ms, success);
    }

    fn record_size(&self, database_type: &str, size_bytes: u64) {
        tracing::info!(target: "dbbackup::metrics", metric = "backup.size", database_type, size_bytes);
    }

    fn increment_count(&self, database_type: &str, status: &str) {
        tracing::info!(target: "dbbackup::metrics", metric = "backup.count", database_type, status);
    }

    fn record_upload_duration(&self, provider: &str, duration_ms: u64) {
        tracing::info!(target: "dbbackup::metrics", metric = "upload.duration", provider, duration_ms);
    }

    fn record_retries(&self, operation: &str, retries: u32) {
        tracing::info!(target: "dbbackup::metrics", metric = "retries", operation, retries);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationSample {
    pub database_type: String,
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsSnapshot {
    pub durations: Vec<DurationSample>,
    pub sizes: Vec<(String, u64)>,
    /// Keyed by `(database_type, status)`.
    pub counts: HashMap<(String, String), u64>,
    pub upload_durations: Vec<(String, u64)>,
    pub retries: HashMap<String, u64>,
}

/// Accumulates measurements in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, database_type: &str, status: &str) -> u64 {
        self.snapshot()
            .counts
            .get(&(database_type.to_string(), status.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_duration(&self, database_type: &str, duration_ms: u64, success: bool) {
        self.update(|m| {
            m.durations.push(DurationSample {
                database_type: database_type.to_string(),
                duration_ms,
                success,
            })
        });
    }

    fn record_size(&self, database_type: &str, size_bytes: u64) {
        self.update(|m| m.sizes.push((database_type.to_string(), size_bytes)));
    }

    fn increment_count(&self, database_type: &str, status: &str) {
        self.update(|m| {
            *m.counts
                .entry((database_type.to_string(), status.to_string()))
                .or_insert(0) += 1
        });
    }

    fn record_upload_duration(&self, provider: &str, duration_ms: u64) {
        self.update(|m| m.upload_durations.push((provider.to_string(), duration_ms)));
    }

    fn record_retries(&self, operation: &str, retries: u32) {
        self.update(|m| *m.retries.entry(operation.to_string()).or_insert(0) += u64::from(retries));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_metrics_accumulate() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_count("postgres", "COMPLETED");
        metrics.increment_count("postgres", "COMPLETED");
        metrics.increment_count("postgres", "FAILED");
        metrics.record_duration("postgres", 1200, true);
        metrics.record_size("postgres", 4096);
        metrics.record_upload_duration("s3", 300);
        metrics.record_retries("upload", 2);

        assert_eq!(metrics.count("postgres", "COMPLETED"), 2);
        assert_eq!(metrics.count("postgres", "FAILED"), 1);
        assert_eq!(metrics.count("mysql", "FAILED"), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.durations.len(), 1);
        assert!(snapshot.durations[0].success);
        assert_eq!(snapshot.sizes, vec![("postgres".to_string(), 4096)]);
        assert_eq!(snapshot.retries.get("upload"), Some(&2));
    }

    #[test]
    fn tracing_metrics_accepts_all_measurements() {
        let metrics = TracingMetrics;
        metrics.record_duration("mysql", 10, false);
        metrics.record_size("mysql", 1);
        metrics.increment_count("mysql", "FAILED");
        metrics.record_upload_duration("local", 1);
        metrics.record_retries("dump", 0);
    }
}
