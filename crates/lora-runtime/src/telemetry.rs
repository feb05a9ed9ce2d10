//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`InferenceMetrics`]: time to first fragment, fragments/sec, run summary
//! - [`TelemetryHook`] trait: callback interface for real-time metric reporting
//! - [`InferenceTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`] / [`TracingTelemetry`]: built-in hooks

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use lora_engine::Device;
use parking_lot::Mutex;

/// Whether a run returned one string or streamed fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Blocking,
    Streaming,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::Blocking => write!(f, "blocking"),
            GenerationMode::Streaming => write!(f, "streaming"),
        }
    }
}

/// Aggregate metrics from a generation run.
#[derive(Debug, Clone)]
pub struct InferenceMetrics {
    /// Device the model ran on.
    pub device: Device,
    pub mode: GenerationMode,
    /// Time from start to the first fragment in milliseconds.
    pub ttft_ms: f64,
    /// Fragments produced per second after the first one arrived.
    pub fragments_per_sec: f64,
    /// Prompt length in characters.
    pub prompt_chars: usize,
    /// Number of fragments produced.
    pub fragments: usize,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: f64,
}

/// Callback trait for real-time generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called when the first fragment of a run is produced.
    fn on_first_fragment(&self, _ttft_ms: f64) {}

    /// Called after each fragment is produced.
    fn on_fragment(&self, _fragment_idx: usize, _elapsed_ms: f64) {}

    /// Called when the run finishes with the full metrics summary.
    fn on_generation_complete(&self, _metrics: &InferenceMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Collects the last run's metrics into a retrievable report.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<InferenceMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the last completed run's metrics.
    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.last_report.lock().clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        *self.last_report.lock() = Some(metrics.clone());
    }
}

/// Emits one `info` event per completed run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        tracing::info!(
            device = %metrics.device,
            mode = %metrics.mode,
            ttft_ms = metrics.ttft_ms,
            fragments = metrics.fragments,
            fragments_per_sec = metrics.fragments_per_sec,
            total_time_ms = metrics.total_time_ms,
            "generation complete"
        );
    }
}

/// Records timestamps during a run to compute [`InferenceMetrics`].
///
/// Usage:
/// 1. Call [`InferenceTimer::new`] at generation start
/// 2. Call [`InferenceTimer::mark_fragment`] after each fragment
/// 3. Call [`InferenceTimer::finish`] to compute final metrics
pub struct InferenceTimer {
    device: Device,
    mode: GenerationMode,
    prompt_chars: usize,
    start: Instant,
    first_fragment: Option<Instant>,
    fragment_count: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl InferenceTimer {
    /// Start a new timer for a generation run.
    pub fn new(
        device: Device,
        mode: GenerationMode,
        prompt_chars: usize,
        hook: Arc<dyn TelemetryHook>,
    ) -> Self {
        Self {
            device,
            mode,
            prompt_chars,
            start: Instant::now(),
            first_fragment: None,
            fragment_count: 0,
            hook,
        }
    }

    /// Mark a fragment produced. The first call also fires `on_first_fragment`.
    pub fn mark_fragment(&mut self) {
        let now = Instant::now();
        if self.first_fragment.is_none() {
            self.first_fragment = Some(now);
            self.hook
                .on_first_fragment(now.duration_since(self.start).as_secs_f64() * 1000.0);
        }
        self.fragment_count += 1;
        let elapsed_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
        self.hook.on_fragment(self.fragment_count, elapsed_ms);
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self) -> InferenceMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        let ttft_ms = self
            .first_fragment
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_time_ms = total_time_ms - ttft_ms;
        let fragments_per_sec = if decode_time_ms > 0.0 && self.fragment_count > 1 {
            (self.fragment_count - 1) as f64 / (decode_time_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = InferenceMetrics {
            device: self.device,
            mode: self.mode,
            ttft_ms,
            fragments_per_sec,
            prompt_chars: self.prompt_chars,
            fragments: self.fragment_count,
            total_time_ms,
        };

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics() -> InferenceMetrics {
        InferenceMetrics {
            device: Device::Cpu,
            mode: GenerationMode::Streaming,
            ttft_ms: 12.5,
            fragments_per_sec: 80.0,
            prompt_chars: 4,
            fragments: 8,
            total_time_ms: 112.5,
        }
    }

    #[test]
    fn log_telemetry_captures_metrics() {
        let hook = LogTelemetry::new();
        assert!(hook.last_metrics().is_none());

        hook.on_generation_complete(&sample_metrics());

        let captured = hook.last_metrics().unwrap();
        assert_eq!(captured.ttft_ms, 12.5);
        assert_eq!(captured.fragments, 8);
    }

    #[test]
    fn inference_timer_fires_hooks() {
        let log = LogTelemetry::new();

        let mut timer = InferenceTimer::new(
            Device::Cpu,
            GenerationMode::Streaming,
            5,
            Arc::new(log.clone()),
        );
        timer.mark_fragment();
        timer.mark_fragment();
        timer.mark_fragment();
        let metrics = timer.finish();

        assert_eq!(metrics.fragments, 3);
        assert_eq!(metrics.prompt_chars, 5);
        assert!(metrics.ttft_ms >= 0.0);
        assert!(metrics.total_time_ms >= metrics.ttft_ms);

        let captured = log.last_metrics().unwrap();
        assert_eq!(captured.fragments, 3);
        assert_eq!(captured.mode, GenerationMode::Streaming);
    }

    #[test]
    fn inference_timer_without_fragments() {
        let timer = InferenceTimer::new(
            Device::Cpu,
            GenerationMode::Blocking,
            1,
            Arc::new(NoopTelemetry),
        );
        let metrics = timer.finish();
        assert_eq!(metrics.ttft_ms, 0.0);
        assert_eq!(metrics.fragments, 0);
        assert_eq!(metrics.fragments_per_sec, 0.0);
    }

    #[test]
    fn tracing_telemetry_accepts_metrics() {
        TracingTelemetry.on_generation_complete(&sample_metrics());
    }

    #[test]
    fn generation_mode_display() {
        assert_eq!(GenerationMode::Blocking.to_string(), "blocking");
        assert_eq!(GenerationMode::Streaming.to_string(), "streaming");
    }
}
