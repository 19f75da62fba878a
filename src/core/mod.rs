mod deferred;
mod guard;
mod telemetry;

pub use deferred::DeferredQueue;
pub use guard::{guarded, guarded_outcome, GuardOutcome};
pub use telemetry::{
    FanoutTelemetry, StepMetrics, StepMetricsRegistry, StepMetricsSnapshot, StepStatus,
    StepTelemetry, TelemetrySink, TracingTelemetry,
};
