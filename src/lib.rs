//! Shotline camera control library
//!
//! Drives an image sensor as a pipeline of per-frame requests. Each
//! [`Shot`] fully describes one frame: exposure, frame time, gain, white
//! balance, output image and statistics, plus timed [`shot::Action`]s
//! for peripherals like a flash or a focus motor. Every [`Frame`] that
//! comes back carries the shot that produced it and the parameters the
//! hardware actually used.
//!
//! # Architecture
//!
//! Three threads run behind a started [`Sensor`]:
//!
//! ```text
//! capture/stream → requests → Setter → in_flight → Handler → frames → get_frame
//!                                 ↓
//!                              actions → Action runner → devices
//! ```
//!
//! The Setter programs the sensor one frame ahead, restarting it when
//! the output mode changes. The Handler pairs driver buffers with the
//! requests that produced them by timestamp. The action runner fires
//! device actions at their scheduled microsecond.
//!
//! # Design Principles
//!
//! - **Frames match shots**: every delivered frame names its shot, and
//!   frames arrive in the order requests were submitted unless a mode
//!   switch reorders completion
//! - **Honest metadata**: reported exposure, gain and timestamps are
//!   read back from the driver, not copied from the request
//! - **Bounded memory**: the frame queue obeys a drop policy
//! - **Swappable hardware**: the pipeline only talks to a
//!   [`SensorBackend`]; [`SimulatedSensor`] stands in for real hardware
//!
//! # Example
//!
//! ```no_run
//! use shotline::{
//!     config::SimConfig,
//!     device::{FireAction, Flash},
//!     Sensor, Shot, SimulatedSensor,
//! };
//! use std::sync::Arc;
//!
//! let backend = Arc::new(SimulatedSensor::new(SimConfig::default()));
//! let sensor = Sensor::builder(backend).build().unwrap();
//!
//! let flash = Arc::new(Flash::new(sensor.backend(), sensor.event_sink()));
//! sensor.attach(flash.clone());
//!
//! let mut shot = Shot::new();
//! shot.exposure = 50_000;
//! shot.add_action(FireAction::new(&flash, 0, flash.max_brightness(), 10_000));
//! sensor.capture(&shot);
//!
//! let frame = sensor.get_frame();
//! assert_eq!(frame.id(), shot.id());
//! println!("flash: {:?}", frame.tag("flash.brightness"));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod backend;
pub mod clock;
pub mod config;
pub mod device;
pub mod event;
pub mod frame;
pub mod history;
pub mod metrics;
pub mod platform;
pub mod queue;
pub mod sensor;
pub mod shot;

pub(crate) mod daemon;

// Re-export commonly used types at crate root
pub use backend::{SensorBackend, SimulatedSensor};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::{DaemonConfig, DropPolicy, SimConfig};
pub use event::{Event, EventKind, Severity};
pub use frame::{Frame, TagValue};
pub use platform::Platform;
pub use sensor::{Sensor, SensorBuilder, SensorError, SensorState};
pub use shot::{Shot, ShotId, WhiteBalance};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
