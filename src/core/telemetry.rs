use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTelemetry {
    pub step: &'static str,
    pub trace_id: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Receives one record per executed pipeline step. Must not block.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &StepTelemetry);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &StepTelemetry) {
        match event.error {
            Some(ref error) => tracing::debug!(
                step = event.step,
                trace_id = %event.trace_id,
                duration_ms = event.duration_ms,
                error = %error,
                "step failed"
            ),
            None => tracing::debug!(
                step = event.step,
                trace_id = %event.trace_id,
                duration_ms = event.duration_ms,
                "step completed"
            ),
        }
    }
}

#[derive(Default)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn record(&self, event: &StepTelemetry) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetricsSnapshot {
    pub call_count: u64,
    pub total_latency_ms: u64,
    pub error_count: u64,
    pub last_called_at: Option<u64>,
}

#[derive(Debug, Default)]
pub struct StepMetrics {
    call_count: AtomicU64,
    total_latency_ms: AtomicU64,
    error_count: AtomicU64,
    last_called_at: AtomicU64,
}

impl StepMetrics {
    pub fn record_call(&self, latency_ms: u64, success: bool) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if !success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.last_called_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.call_count();
        if calls == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / calls as f64
    }

    pub fn snapshot(&self) -> StepMetricsSnapshot {
        let last = self.last_called_at.load(Ordering::Relaxed);
        StepMetricsSnapshot {
            call_count: self.call_count(),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            error_count: self.error_count(),
            last_called_at: (last != 0).then_some(last),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub step: String,
    pub call_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub status: String,
}

/// Per-step counters, created on first use of each step name.
#[derive(Default)]
pub struct StepMetricsRegistry {
    metrics: RwLock<HashMap<&'static str, Arc<StepMetrics>>>,
}

impl StepMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, step: &str) -> Option<Arc<StepMetrics>> {
        self.metrics.read().get(step).cloned()
    }

    fn entry(&self, step: &'static str) -> Arc<StepMetrics> {
        if let Some(m) = self.metrics.read().get(step) {
            return Arc::clone(m);
        }
        let mut metrics = self.metrics.write();
        Arc::clone(metrics.entry(step).or_default())
    }

    pub fn snapshot(&self) -> Vec<StepStatus> {
        let metrics = self.metrics.read();
        let mut statuses: Vec<StepStatus> = metrics
            .iter()
            .map(|(step, m)| {
                let calls = m.call_count();
                let errors = m.error_count();
                let status = if calls == 0 {
                    "idle"
                } else if errors * 2 > calls {
                    "degraded"
                } else {
                    "healthy"
                };
                StepStatus {
                    step: step.to_string(),
                    call_count: calls,
                    error_count: errors,
                    avg_latency_ms: m.avg_latency_ms(),
                    status: status.to_string(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.step.cmp(&b.step));
        statuses
    }
}

impl TelemetrySink for StepMetricsRegistry {
    fn record(&self, event: &StepTelemetry) {
        self.entry(event.step)
            .record_call(event.duration_ms, event.success);
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
