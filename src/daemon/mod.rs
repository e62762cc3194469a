//! The capture daemon: three threads moving requests through the sensor.
//!
//! ```text
//!  request queue ──► Setter ──► in-flight queue ──► Handler ──► frame queue
//!                      │                              ▲
//!                      └──► action queue ──► Runner   └── driver buffers
//! ```
//!
//! The setter wakes on every vertical sync and programs the sensor for
//! the next request; once a request's frame has started it predicts when
//! the exposure starts and when the image will be ready, schedules the
//! shot's actions and passes the record on. The handler pairs driver
//! buffers with in-flight records by comparing timestamps against those
//! predictions. The action runner fires actions at their deadlines.
//!
//! Changing resolution, format or statistics configuration needs a
//! sensor restart. The setter raises the flush flag and takes the camera
//! lock, which the handler gives up once nothing is in flight.

mod actions;
mod drop_policy;
mod handler;
mod priority;
mod record;
mod setter;

pub(crate) use record::{LiveCounter, RequestRecord};

use crate::backend::SensorBackend;
use crate::clock::Clock;
use crate::config::{DaemonConfig, DropPolicy};
use crate::event::{EventKind, EventSink};
use crate::frame::Frame;
use crate::metrics::PipelineMetrics;
use crate::platform::Platform;
use crate::queue::{PriorityQueue, TsQueue};
use crate::shot::Shot;
use actions::{ActionRunner, ScheduledAction};
use handler::Handler;
use parking_lot::Mutex;
use priority::ThreadRole;
use setter::Setter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Supplies requests while streaming and accounts for requests the
/// pipeline gives up on.
pub(crate) trait RequestSource: Send + Sync {
    /// Copies of the shots to repeat when the request queue runs dry.
    fn generate(&self) -> Vec<Shot>;
    /// `count` wanted requests will never produce a frame.
    fn discarded(&self, count: usize);
}

/// State shared by the daemon threads and the sensor.
pub(crate) struct Shared {
    pub backend: Arc<dyn SensorBackend>,
    pub clock: Arc<dyn Clock>,
    pub platform: Arc<Platform>,
    pub config: DaemonConfig,
    pub requests: TsQueue<RequestRecord>,
    pub in_flight: TsQueue<RequestRecord>,
    pub frames: TsQueue<RequestRecord>,
    pub actions: Arc<PriorityQueue<ScheduledAction>>,
    /// Held by the handler while it talks to the driver; taken by the
    /// setter for a mode switch.
    pub camera: Mutex<()>,
    pub flushing: AtomicBool,
    pub stop: Arc<AtomicBool>,
    pub drop_policy: Mutex<(DropPolicy, usize)>,
    pub source: Arc<dyn RequestSource>,
    pub events: EventSink,
    pub metrics: Arc<PipelineMetrics>,
    pub live: LiveCounter,
}

impl Shared {
    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn driver_error(&self, what: &str, error: impl std::fmt::Display) {
        self.metrics.driver_error();
        self.events
            .error(EventKind::DriverError, format!("{what}: {error}"));
    }

    /// Reports wanted records that will never be delivered.
    pub(crate) fn abandon(&self, records: impl IntoIterator<Item = RequestRecord>) {
        let count = records.into_iter().filter(RequestRecord::wanted).count();
        if count > 0 {
            self.source.discarded(count);
        }
    }

    /// Pushes a completed record and applies the drop policy.
    pub(crate) fn deliver(&self, record: RequestRecord) {
        self.frames.push(record);
        self.metrics.frame_delivered();

        let (policy, limit) = *self.drop_policy.lock();
        self.evict(policy, limit);
        self.metrics
            .set_queue_depths(self.frames.len(), self.in_flight.len());
    }

    fn evict(&self, policy: DropPolicy, limit: usize) {
        let evicted = drop_policy::enforce(&self.frames, policy, limit);
        if evicted.is_empty() {
            return;
        }
        let count = evicted.len();
        self.metrics.frames_dropped(count);
        self.events.warning(
            EventKind::FrameLimitHit,
            format!("Frame queue over its limit of {limit}, dropped {count} frame(s) ({policy:?})"),
        );
        self.abandon(evicted);
    }
}

/// What the sensor hands the daemon at launch.
pub(crate) struct DaemonParts {
    pub backend: Arc<dyn SensorBackend>,
    pub platform: Arc<Platform>,
    pub config: DaemonConfig,
    pub drop_policy: (DropPolicy, usize),
    pub source: Arc<dyn RequestSource>,
    pub events: EventSink,
    pub metrics: Arc<PipelineMetrics>,
    pub live: LiveCounter,
}

/// Running pipeline for one sensor.
///
/// If the device cannot be opened the daemon starts no threads and
/// reports itself as not running; it can still be shut down safely.
pub(crate) struct CaptureDaemon {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl CaptureDaemon {
    pub(crate) fn launch(parts: DaemonParts) -> Self {
        let clock = parts.backend.clock();
        let shared = Arc::new(Shared {
            backend: parts.backend,
            clock,
            platform: parts.platform,
            config: parts.config,
            requests: TsQueue::new(),
            in_flight: TsQueue::new(),
            frames: TsQueue::new(),
            actions: Arc::new(PriorityQueue::new()),
            camera: Mutex::new(()),
            flushing: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            drop_policy: Mutex::new(parts.drop_policy),
            source: parts.source,
            events: parts.events,
            metrics: parts.metrics,
            live: parts.live,
        });
        let daemon = Self {
            shared,
            threads: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        };

        if let Err(e) = daemon.shared.backend.open() {
            daemon.shared.events.error(
                EventKind::DriverMissing,
                format!("Could not open the sensor device: {e}"),
            );
            return daemon;
        }

        match daemon.spawn_threads() {
            Ok(()) => {
                daemon.running.store(true, Ordering::Release);
                tracing::info!("Capture daemon launched");
            }
            Err(e) => {
                daemon
                    .shared
                    .events
                    .error(EventKind::InternalError, format!("Could not start thread: {e}"));
                daemon.shutdown();
                daemon.shared.backend.close();
            }
        }
        daemon
    }

    fn spawn_threads(&self) -> std::io::Result<()> {
        let realtime = self.shared.config.realtime_priorities;
        let mut threads = self.threads.lock();

        let runner = ActionRunner {
            queue: Arc::clone(&self.shared.actions),
            clock: Arc::clone(&self.shared.clock),
            spin_us: self.shared.config.action_spin_us as i64,
            poll: self.shared.config.flush_poll(),
            stop: Arc::clone(&self.shared.stop),
            metrics: Arc::clone(&self.shared.metrics),
        };
        threads.push(spawn("shotline-actions", realtime, ThreadRole::Actions, move || {
            runner.run()
        })?);

        let setter = Setter::new(Arc::clone(&self.shared));
        threads.push(spawn("shotline-setter", realtime, ThreadRole::Setter, move || {
            setter.run()
        })?);

        let handler = Handler::new(Arc::clone(&self.shared));
        threads.push(spawn("shotline-handler", realtime, ThreadRole::Handler, move || {
            handler.run()
        })?);
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queues a copy of `shot` for capture.
    pub(crate) fn submit(&self, shot: Shot) {
        self.shared
            .requests
            .push(RequestRecord::new(shot, &self.shared.live));
        self.shared.metrics.request_submitted(1);
    }

    /// Next completed frame, waiting at most `timeout`.
    pub(crate) fn next_frame(&self, timeout: Duration) -> Option<Frame> {
        let record = self.shared.frames.pull_timeout(timeout)?;
        self.shared
            .metrics
            .set_queue_depths(self.shared.frames.len(), self.shared.in_flight.len());
        Some(record.into_frame(Arc::clone(&self.shared.platform)))
    }

    pub(crate) fn frames_queued(&self) -> usize {
        self.shared.frames.len()
    }

    pub(crate) fn requests_queued(&self) -> usize {
        self.shared.requests.len()
    }

    /// Withdraws the most recently queued request not yet picked up by
    /// the setter. Returns whether it was a wanted request.
    pub(crate) fn withdraw_request(&self) -> Option<bool> {
        self.shared
            .requests
            .try_pull_back()
            .map(|record| record.wanted())
    }

    pub(crate) fn set_drop_policy(&self, policy: DropPolicy, limit: usize) {
        *self.shared.drop_policy.lock() = (policy, limit);
        self.shared.evict(policy, limit);
    }

    /// Stops every thread, discards whatever is still queued and closes
    /// the device. Safe to call more than once.
    pub(crate) fn shutdown(&self) {
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let was_running = self.running.swap(false, Ordering::AcqRel);

        self.shared.stop.store(true, Ordering::Release);
        self.shared.flushing.store(false, Ordering::Release);
        self.shared.actions.close();
        for thread in threads {
            if thread.join().is_err() {
                tracing::error!("Capture daemon thread panicked");
            }
        }

        let discarded_actions = self.shared.actions.drain().len();
        self.shared.abandon(self.shared.requests.drain());
        self.shared.abandon(self.shared.in_flight.drain());
        self.shared.abandon(self.shared.frames.drain());
        self.shared.metrics.set_queue_depths(0, 0);

        if was_running {
            if let Err(e) = self.shared.backend.stop_streaming() {
                tracing::debug!(error = %e, "Stop streaming on shutdown failed");
            }
            self.shared.backend.close();
            tracing::info!(discarded_actions, "Capture daemon stopped");
        }
    }
}

impl Drop for CaptureDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn(
    name: &str,
    realtime: bool,
    role: ThreadRole,
    body: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.into()).spawn(move || {
        if realtime {
            priority::promote_current_thread(role);
        }
        body()
    })
}
