//! End-to-end tests of the capture pipeline against the simulated sensor.

use parking_lot::Mutex;
use shotline::{
    config::{IspModel, ReadoutModel},
    device::{FireAction, Flash},
    shot::{FnAction, ImageRequest, PixelFormat, SharedImage, Size},
    DaemonConfig, DropPolicy, EventKind, Sensor, SensorBackend, Severity, Shot, SimConfig,
    SimulatedSensor, Timestamp, WhiteBalance,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const READOUT_US: u32 = 5_000;
const ISP_US: u32 = 1_000;

/// Sensor and daemon agreeing on a short readout so tests run quickly.
fn fast_configs() -> (SimConfig, DaemonConfig) {
    let readout = ReadoutModel {
        short_us: READOUT_US,
        ..Default::default()
    };
    let isp = IspModel {
        yuv_us: ISP_US,
        ..Default::default()
    };
    let sim = SimConfig {
        min_frame_time_us: 20_000,
        readout,
        isp,
        ..Default::default()
    };
    let daemon = DaemonConfig {
        late_slack_us: 8_000,
        early_slack_us: 8_000,
        readout,
        isp,
        ..Default::default()
    };
    (sim, daemon)
}

fn create_test_sensor() -> (Sensor, Arc<SimulatedSensor>) {
    let (sim, daemon) = fast_configs();
    sensor_with(sim, daemon)
}

fn sensor_with(sim: SimConfig, daemon: DaemonConfig) -> (Sensor, Arc<SimulatedSensor>) {
    let backend = Arc::new(SimulatedSensor::new(sim));
    let sensor = Sensor::builder(backend.clone())
        .config(daemon)
        .build()
        .expect("Failed to create sensor");
    (sensor, backend)
}

fn shot(width: u32, height: u32, exposure: u32) -> Shot {
    let mut shot = Shot::new();
    shot.image.size = Size::new(width, height);
    shot.exposure = exposure;
    shot
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_single_capture_reports_actual_parameters() {
    let (sensor, _backend) = create_test_sensor();
    let shot = shot(640, 480, 50_000);
    sensor.capture(&shot);

    let frame = sensor.get_frame();
    assert!(frame.is_valid());
    assert_eq!(frame.id(), shot.id());
    assert_eq!(frame.exposure(), 50_000);
    // Frame time is raised to fit the exposure plus the fixed overhead.
    assert_eq!(frame.frame_time(), 50_400);
    assert_eq!(frame.gain(), 1.0);
    assert_eq!(frame.white_balance(), Some(WhiteBalance::Kelvin(5000)));

    assert_eq!(
        frame.exposure_end() - frame.exposure_start(),
        50_000 + READOUT_US as i64
    );
    assert!(frame.processing_done() >= frame.exposure_end());

    assert_eq!(frame.image().size(), Size::new(640, 480));
    let bytes = frame.image().bytes().expect("pipeline-allocated pixels");
    assert_eq!(bytes.len(), 640 * 480 * 2);
    assert_eq!(sensor.shots_pending(), 0);

    let problems: Vec<_> = std::iter::from_fn(|| sensor.poll_event())
        .filter(|e| e.severity >= Severity::Warning)
        .collect();
    assert!(problems.is_empty(), "unexpected events: {problems:?}");
}

#[test]
fn test_processing_done_follows_buffer_timestamp() {
    let (mut sim, daemon) = fast_configs();
    sim.timing_noise_us = 3_000;
    sim.seed = 7;
    let (sensor, _backend) = sensor_with(sim, daemon);

    let shots: Vec<Shot> = (0..6).map(|_| shot(320, 240, 5_000)).collect();
    sensor.capture_burst(&shots);

    let overheads: Vec<i64> = shots
        .iter()
        .map(|expected| {
            let frame = sensor.get_frame();
            assert_eq!(frame.id(), expected.id());
            assert!(!frame.image().is_discarded());
            frame.processing_done() - frame.exposure_start() - frame.exposure() as i64
        })
        .collect();

    let nominal = (READOUT_US + ISP_US) as i64;
    for overhead in &overheads {
        assert!(
            (nominal - 3_000..=nominal + 3_000).contains(overhead),
            "overhead {overhead} µs outside the jitter window"
        );
    }
    assert!(
        overheads.iter().any(|o| *o != overheads[0]),
        "jittered buffers reported identical times: {overheads:?}"
    );
}

#[test]
fn test_lost_frames_are_discarded_in_order() {
    let (mut sim, daemon) = fast_configs();
    sim.drop_every = 3;
    let (sensor, _backend) = sensor_with(sim, daemon);

    let shots: Vec<Shot> = (0..8).map(|_| shot(320, 240, 5_000)).collect();
    sensor.capture_burst(&shots);

    let mut discarded = Vec::new();
    for (i, expected) in shots.iter().enumerate() {
        let frame = sensor.get_frame();
        assert!(frame.is_valid());
        assert_eq!(frame.id(), expected.id());
        if frame.image().is_discarded() {
            discarded.push(i);
        }
    }

    assert!(discarded.len() >= 2, "discarded frames: {discarded:?}");
    for pair in discarded.windows(2) {
        assert_eq!(pair[1] - pair[0], 3, "discarded frames: {discarded:?}");
    }
    assert_eq!(
        sensor.metrics().snapshot().late_frames,
        discarded.len() as u64
    );

    let dropped = std::iter::from_fn(|| sensor.poll_event())
        .filter(|e| e.kind == EventKind::ImageDropped)
        .inspect(|e| assert_eq!(e.severity, Severity::Warning))
        .count();
    assert_eq!(dropped, discarded.len());

    sensor.stop();
    assert_eq!(sensor.records_alive(), 0);
}

#[test]
fn test_idle_sensor_issues_bubbles_without_frames() {
    let (sensor, _backend) = create_test_sensor();
    let first = shot(320, 240, 5_000);
    sensor.capture(&first);
    assert_eq!(sensor.get_frame().id(), first.id());

    let metrics = sensor.metrics();
    assert!(wait_until(Duration::from_secs(5), || {
        metrics.snapshot().bubbles >= 3
    }));
    assert!(sensor.get_frame_timeout(Duration::from_millis(100)).is_none());
    assert_eq!(sensor.frames_pending(), 0);
    assert_eq!(metrics.snapshot().frames_delivered, 1);

    let next = shot(320, 240, 5_000);
    sensor.capture(&next);
    assert_eq!(sensor.get_frame().id(), next.id());
}

#[test]
fn test_burst_frames_arrive_in_submission_order() {
    let (sensor, _backend) = create_test_sensor();
    let shots: Vec<Shot> = [5_000, 15_000, 8_000, 25_000, 10_000]
        .into_iter()
        .map(|exposure| shot(320, 240, exposure))
        .collect();
    sensor.capture_burst(&shots);
    assert_eq!(sensor.shots_pending(), shots.len());

    for expected in &shots {
        let frame = sensor.get_frame();
        assert_eq!(frame.id(), expected.id());
        assert_eq!(frame.exposure(), expected.exposure);
    }
    assert_eq!(sensor.shots_pending(), 0);
}

#[test]
fn test_mode_switches_keep_images_matched_to_shots() {
    let (sensor, backend) = create_test_sensor();
    let sizes = [(640, 480), (320, 240), (640, 480), (320, 240)];
    let shots: Vec<Shot> = sizes.iter().map(|&(w, h)| shot(w, h, 10_000)).collect();
    sensor.capture_burst(&shots);

    for expected in &shots {
        let frame = sensor.get_frame();
        assert_eq!(frame.id(), expected.id());
        let size = expected.image.size;
        assert_eq!(frame.image().size(), size);
        let bytes = frame.image().bytes().expect("pixels kept");
        assert_eq!(bytes.len(), size.area() * 2);
    }

    assert_eq!(sensor.metrics().snapshot().mode_switches, 4);
    drop(sensor);
    assert!(!backend.is_streaming());
}

#[test]
fn test_drop_oldest_keeps_latest_frames() {
    let (sensor, _backend) = create_test_sensor();
    sensor.set_drop_policy(DropPolicy::DropOldest, 2);

    let shots: Vec<Shot> = (0..5).map(|_| shot(320, 240, 5_000)).collect();
    sensor.capture_burst(&shots);

    let metrics = sensor.metrics();
    assert!(wait_until(Duration::from_secs(5), || {
        metrics.snapshot().frames_delivered >= 5
    }));
    assert_eq!(sensor.frames_pending(), 2);
    assert_eq!(metrics.snapshot().frames_dropped, 3);
    assert_eq!(sensor.shots_pending(), 2);

    assert_eq!(sensor.get_frame().id(), shots[3].id());
    assert_eq!(sensor.get_frame().id(), shots[4].id());

    let limit_hit = std::iter::from_fn(|| sensor.poll_event())
        .any(|e| e.kind == EventKind::FrameLimitHit);
    assert!(limit_hit);
}

#[test]
fn test_drop_newest_keeps_earliest_frames() {
    let (sensor, _backend) = create_test_sensor();
    sensor.set_drop_policy(DropPolicy::DropNewest, 2);

    let shots: Vec<Shot> = (0..4).map(|_| shot(320, 240, 5_000)).collect();
    sensor.capture_burst(&shots);

    let metrics = sensor.metrics();
    assert!(wait_until(Duration::from_secs(5), || {
        let m = metrics.snapshot();
        m.frames_delivered >= 4
    }));
    assert_eq!(sensor.get_frame().id(), shots[0].id());
    assert_eq!(sensor.get_frame().id(), shots[1].id());
    assert_eq!(sensor.frames_pending(), 0);
}

#[test]
fn test_action_fires_relative_to_exposure_start() {
    let (sensor, backend) = create_test_sensor();
    let clock = backend.clock();
    let fired: Arc<Mutex<Option<Timestamp>>> = Arc::new(Mutex::new(None));

    let mut shot = shot(320, 240, 30_000);
    {
        let fired = Arc::clone(&fired);
        let clock = Arc::clone(&clock);
        shot.add_action(FnAction::new(10_000, 0, move || {
            *fired.lock() = Some(clock.now());
        }));
    }
    sensor.capture(&shot);

    let frame = sensor.get_frame();
    assert_eq!(frame.id(), shot.id());
    let fired_at = fired.lock().expect("action fired");
    let error = fired_at - (frame.exposure_start() + 10_000);
    assert!(
        (-1_000..5_000).contains(&error),
        "action fired {error} µs from its target"
    );
}

#[test]
fn test_flash_fire_is_tagged_on_frame() {
    let (sensor, _backend) = create_test_sensor();
    let flash = Arc::new(Flash::new(sensor.backend(), sensor.event_sink()));
    sensor.attach(flash.clone());

    let mut shot = shot(320, 240, 50_000);
    shot.add_action(FireAction::new(&flash, 10_000, flash.max_brightness(), 20_000));
    sensor.capture(&shot);

    let frame = sensor.get_frame();
    let brightness = frame
        .tag("flash.brightness")
        .and_then(|v| v.as_float())
        .expect("flash brightness tag");
    assert_eq!(brightness, flash.max_brightness() as f64);

    let start = frame
        .tag("flash.start")
        .and_then(|v| v.as_int())
        .expect("flash start tag");
    assert!((9_000..20_000).contains(&start), "flash started at {start}");
}

#[test]
fn test_streaming_repeats_until_stopped() {
    let (sensor, _backend) = create_test_sensor();
    let shot = shot(320, 240, 5_000);
    sensor.stream(&shot);
    assert!(sensor.is_streaming());

    for _ in 0..5 {
        let frame = sensor.get_frame();
        assert!(frame.is_valid());
        assert_eq!(frame.id(), shot.id());
    }

    sensor.stop_streaming();
    assert!(!sensor.is_streaming());
    sensor.stop();
    assert_eq!(sensor.shots_pending(), 0);
}

#[test]
fn test_caller_owned_image_receives_pixels() {
    let (sensor, _backend) = create_test_sensor();
    let target = SharedImage::new(Size::new(320, 240), PixelFormat::Uyvy);
    let mut shot = shot(320, 240, 20_000);
    shot.image = ImageRequest::into_target(target.clone());
    sensor.capture(&shot);

    let frame = sensor.get_frame();
    assert_eq!(frame.id(), shot.id());
    assert!(!frame.image().is_discarded());
    assert!(target.lock().iter().any(|&b| b != 0));
}

#[test]
fn test_records_released_after_stop() {
    let (sensor, _backend) = create_test_sensor();
    let shots: Vec<Shot> = (0..6).map(|_| shot(320, 240, 5_000)).collect();
    sensor.capture_burst(&shots);
    let _ = sensor.get_frame();

    sensor.stop();
    assert_eq!(sensor.records_alive(), 0);
    assert_eq!(sensor.shots_pending(), 0);
    assert!(!sensor.get_frame().is_valid());
}

#[test]
fn test_capture_after_stop_restarts() {
    let (sensor, _backend) = create_test_sensor();
    let first = shot(320, 240, 5_000);
    sensor.capture(&first);
    assert_eq!(sensor.get_frame().id(), first.id());
    sensor.stop();

    let second = shot(320, 240, 5_000);
    sensor.capture(&second);
    assert_eq!(sensor.get_frame().id(), second.id());
}

#[test]
fn test_missing_device_reports_and_returns_invalid() {
    let (sim, daemon) = fast_configs();
    let sensor = Sensor::builder(Arc::new(SimulatedSensor::disconnected(sim)))
        .config(daemon)
        .build()
        .expect("Failed to create sensor");

    sensor.capture(&shot(320, 240, 5_000));
    assert!(!sensor.get_frame().is_valid());

    let kinds: Vec<EventKind> = std::iter::from_fn(|| sensor.poll_event())
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&EventKind::DriverMissing));
    assert!(kinds.contains(&EventKind::SensorStopped));
}
