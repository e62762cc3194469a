//! Pipeline counters and gauges.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registering or creating a metric failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Shots accepted by `capture` or generated while streaming.
    pub requests_submitted: u64,
    /// Frames pushed onto the frame queue.
    pub frames_delivered: u64,
    /// Frames evicted by the drop policy.
    pub frames_dropped: u64,
    /// Requests whose image never arrived.
    pub late_frames: u64,
    /// Buffers matching no in-flight request.
    pub unexpected_buffers: u64,
    /// Filler shots issued while idle.
    pub bubbles: u64,
    /// Sensor restarts for a new mode.
    pub mode_switches: u64,
    /// Actions executed by the action runner.
    pub actions_fired: u64,
    /// Failed driver calls.
    pub driver_errors: u64,
}

/// Prometheus registry holding every pipeline metric.
///
/// Shared by the sensor and its threads; all updates are lock-free.
pub struct PipelineMetrics {
    registry: Registry,

    requests_submitted: IntCounter,
    frames_delivered: IntCounter,
    frames_dropped: IntCounter,
    late_frames: IntCounter,
    unexpected_buffers: IntCounter,
    bubbles: IntCounter,
    mode_switches: IntCounter,
    actions_fired: IntCounter,
    driver_errors: IntCounter,

    frame_queue_depth: IntGauge,
    in_flight_depth: IntGauge,
    shots_pending: IntGauge,

    action_lateness_us: Histogram,
}

impl PipelineMetrics {
    /// Creates a registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_submitted = IntCounter::new(
            "shotline_requests_submitted_total",
            "Shots queued for capture",
        )?;
        let frames_delivered = IntCounter::new(
            "shotline_frames_delivered_total",
            "Frames handed to the frame queue",
        )?;
        let frames_dropped = IntCounter::new(
            "shotline_frames_dropped_total",
            "Frames evicted because the frame queue was full",
        )?;
        let late_frames = IntCounter::new(
            "shotline_late_frames_total",
            "Requests whose image data never arrived",
        )?;
        let unexpected_buffers = IntCounter::new(
            "shotline_unexpected_buffers_total",
            "Driver buffers no request accounted for",
        )?;
        let bubbles = IntCounter::new(
            "shotline_bubbles_total",
            "Filler shots issued while no request was queued",
        )?;
        let mode_switches = IntCounter::new(
            "shotline_mode_switches_total",
            "Sensor restarts to change resolution, format or statistics",
        )?;
        let actions_fired = IntCounter::new(
            "shotline_actions_fired_total",
            "Timed actions executed",
        )?;
        let driver_errors = IntCounter::new(
            "shotline_driver_errors_total",
            "Failed driver calls",
        )?;

        let frame_queue_depth = IntGauge::new(
            "shotline_frame_queue_depth",
            "Frames waiting to be collected",
        )?;
        let in_flight_depth = IntGauge::new(
            "shotline_in_flight_depth",
            "Requests programmed into the sensor and awaiting data",
        )?;
        let shots_pending = IntGauge::new(
            "shotline_shots_pending",
            "Requested frames not yet collected",
        )?;

        let action_lateness_us = Histogram::with_opts(
            HistogramOpts::new(
                "shotline_action_lateness_us",
                "Actual minus scheduled action time in microseconds",
            )
            .buckets(vec![
                -1000.0, -100.0, -10.0, 0.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0,
            ]),
        )?;

        registry.register(Box::new(requests_submitted.clone()))?;
        registry.register(Box::new(frames_delivered.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(late_frames.clone()))?;
        registry.register(Box::new(unexpected_buffers.clone()))?;
        registry.register(Box::new(bubbles.clone()))?;
        registry.register(Box::new(mode_switches.clone()))?;
        registry.register(Box::new(actions_fired.clone()))?;
        registry.register(Box::new(driver_errors.clone()))?;
        registry.register(Box::new(frame_queue_depth.clone()))?;
        registry.register(Box::new(in_flight_depth.clone()))?;
        registry.register(Box::new(shots_pending.clone()))?;
        registry.register(Box::new(action_lateness_us.clone()))?;

        Ok(Self {
            registry,
            requests_submitted,
            frames_delivered,
            frames_dropped,
            late_frames,
            unexpected_buffers,
            bubbles,
            mode_switches,
            actions_fired,
            driver_errors,
            frame_queue_depth,
            in_flight_depth,
            shots_pending,
            action_lateness_us,
        })
    }

    pub(crate) fn request_submitted(&self, count: usize) {
        self.requests_submitted.inc_by(count as u64);
    }

    pub(crate) fn frame_delivered(&self) {
        self.frames_delivered.inc();
    }

    pub(crate) fn frames_dropped(&self, count: usize) {
        self.frames_dropped.inc_by(count as u64);
    }

    pub(crate) fn late_frame(&self) {
        self.late_frames.inc();
    }

    pub(crate) fn unexpected_buffer(&self) {
        self.unexpected_buffers.inc();
    }

    pub(crate) fn bubble(&self) {
        self.bubbles.inc();
    }

    pub(crate) fn mode_switch(&self) {
        self.mode_switches.inc();
    }

    pub(crate) fn action_fired(&self, lateness_us: i64) {
        self.actions_fired.inc();
        self.action_lateness_us.observe(lateness_us as f64);
    }

    pub(crate) fn driver_error(&self) {
        self.driver_errors.inc();
    }

    pub(crate) fn set_queue_depths(&self, frames: usize, in_flight: usize) {
        self.frame_queue_depth.set(frames as i64);
        self.in_flight_depth.set(in_flight as i64);
    }

    pub(crate) fn set_shots_pending(&self, pending: usize) {
        self.shots_pending.set(pending as i64);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_submitted: self.requests_submitted.get(),
            frames_delivered: self.frames_delivered.get(),
            frames_dropped: self.frames_dropped.get(),
            late_frames: self.late_frames.get(),
            unexpected_buffers: self.unexpected_buffers.get(),
            bubbles: self.bubbles.get(),
            mode_switches: self.mode_switches.get(),
            actions_fired: self.actions_fired.get(),
            driver_errors: self.driver_errors.get(),
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
