//! Controller Metrics
//!
//! Per-RPC outcome counters and latency histograms on a registry owned by
//! the controller.

use crate::error::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

pub struct ControllerMetrics {
    registry: Registry,
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "fcd_csi_controller_operations_total",
                "Controller RPCs by operation and outcome code",
            ),
            &["operation", "code"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "fcd_csi_controller_operation_duration_seconds",
                "Duration of controller RPCs",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            operations,
            duration,
        })
    }

    /// Record one finished RPC
    pub fn observe<T>(&self, operation: &str, elapsed: Duration, result: &Result<T>) {
        let code = match result {
            Ok(_) => "OK",
            Err(e) => e.code().as_str(),
        };
        self.operations.with_label_values(&[operation, code]).inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn count(&self, operation: &str, code: &str) -> u64 {
        self.operations.with_label_values(&[operation, code]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerMetrics").finish_non_exhaustive()
    }
}
