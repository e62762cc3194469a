//! Prometheus metrics for the capture pipeline.
//!
//! Every sensor owns a [`PipelineMetrics`] registry that its threads
//! update as requests flow through. With the `metrics` feature the
//! registry can be served over HTTP for scraping.
//!
//! # Metrics Exposed
//!
//! ## Counters
//! - `shotline_requests_submitted_total` - Shots queued for capture
//! - `shotline_frames_delivered_total` - Frames handed to the application
//! - `shotline_frames_dropped_total` - Frames evicted by the drop policy
//! - `shotline_late_frames_total` - Requests whose image never arrived
//! - `shotline_unexpected_buffers_total` - Buffers matching no request
//! - `shotline_bubbles_total` - Filler shots issued while idle
//! - `shotline_mode_switches_total` - Sensor restarts
//! - `shotline_actions_fired_total` - Timed actions executed
//! - `shotline_driver_errors_total` - Failed driver calls
//!
//! ## Gauges
//! - `shotline_frame_queue_depth` - Frames waiting to be collected
//! - `shotline_in_flight_depth` - Requests awaiting sensor data
//! - `shotline_shots_pending` - Requested frames not yet collected
//!
//! ## Histograms
//! - `shotline_action_lateness_us` - Action firing error
//!
//! # Example
//!
//! ```no_run
//! use shotline::metrics::PipelineMetrics;
//!
//! let metrics = PipelineMetrics::new().expect("Failed to create registry");
//! println!("{}", metrics.encode().expect("Failed to encode"));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsSnapshot, PipelineMetrics};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
