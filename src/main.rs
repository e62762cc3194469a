//! Shotline CLI
//!
//! Runs the capture pipeline against the simulated sensor and reports
//! what each frame was actually taken with.

use clap::Parser;
use shotline::{
    analysis::{auto_expose, auto_white_balance, ExposureLimits},
    config::FileConfig,
    device::{FireAction, Flash},
    shot::{HistogramConfig, Rect, Size},
    Frame, Sensor, Severity, Shot, SimulatedSensor,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "shotline", version, about = "Per-frame camera sensor control demo")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames to capture (overrides the configuration file).
    #[arg(short = 'n', long)]
    count: Option<u32>,

    /// Image width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Image height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Exposure time in microseconds.
    #[arg(short, long, default_value_t = 20_000)]
    exposure: u32,

    /// Analog gain.
    #[arg(short, long, default_value_t = 1.0)]
    gain: f32,

    /// Stream instead of issuing one capture per frame.
    #[arg(long)]
    stream: bool,

    /// Adjust exposure and white balance from each frame's histogram.
    #[arg(long)]
    auto: bool,

    /// Fire the flash at the start of every exposure.
    #[arg(long)]
    flash: bool,

    /// Serve Prometheus metrics on this port (0 to disable).
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };

    info!("Shotline v{}", shotline::VERSION);
    info!("Driving the simulated sensor");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }
    }

    let backend = Arc::new(SimulatedSensor::new(config.simulator.clone()));
    let sensor = match Sensor::builder(backend).config(config.daemon.clone()).build() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to create sensor: {}", e);
            std::process::exit(1);
        }
    };

    let metrics_port = args.metrics_port.unwrap_or(config.output.metrics_port);
    if metrics_port != 0 {
        serve_metrics(&sensor, metrics_port);
    }

    let mut shot = Shot::new();
    shot.exposure = args.exposure;
    shot.gain = args.gain;
    shot.image.size = Size::new(args.width, args.height);
    shot.histogram = HistogramConfig {
        enabled: true,
        region: Rect::covering(shot.image.size),
        buckets: 64,
    };

    if args.flash {
        let flash = Arc::new(Flash::new(sensor.backend(), sensor.event_sink()));
        sensor.attach(flash.clone());
        let duration = i64::from(shot.exposure).clamp(flash.min_duration(), flash.max_duration());
        shot.add_action(FireAction::new(&flash, 0, flash.max_brightness(), duration));
    }

    let frame_count = args.count.unwrap_or(config.output.frame_count);
    info!(frame_count, stream = args.stream, "Capturing frames...");

    if args.stream {
        sensor.stream(&shot);
    }

    let limits = ExposureLimits {
        min_exposure: sensor.min_exposure(),
        max_exposure: sensor.max_exposure().min(100_000),
        max_gain: sensor.max_gain(),
        ..ExposureLimits::default()
    };

    let mut delivered = 0u32;
    let mut invalid = 0u32;
    while delivered < frame_count && running.load(Ordering::SeqCst) {
        if !args.stream {
            sensor.capture(&shot);
        }

        let Some(frame) = sensor.get_frame_timeout(Duration::from_secs(2)) else {
            warn!("No frame within 2 s");
            continue;
        };
        if !frame.is_valid() {
            invalid += 1;
            error!("Sensor stopped unexpectedly");
            break;
        }
        report(delivered, &frame);
        delivered += 1;

        if args.auto {
            auto_expose(&mut shot, &frame, &limits);
            auto_white_balance(&mut shot, &frame, 2000, 10_000, 0.5);
            if args.stream {
                sensor.stream(&shot);
            }
        }

        while let Some(event) = sensor.poll_event() {
            match event.severity {
                Severity::Error => error!("{}", event),
                Severity::Warning => warn!("{}", event),
                Severity::Info => info!("{}", event),
            }
        }
    }

    sensor.stop();

    let m = sensor.metrics().snapshot();
    info!(
        "Delivered {} frames ({} invalid): {} submitted, {} dropped, {} late, {} bubbles, {} mode switches",
        delivered,
        invalid,
        m.requests_submitted,
        m.frames_dropped,
        m.late_frames,
        m.bubbles,
        m.mode_switches
    );
    if m.actions_fired > 0 || m.driver_errors > 0 {
        info!(
            "Actions fired: {}, driver errors: {}",
            m.actions_fired, m.driver_errors
        );
    }

    info!("Done. Records still alive: {}", sensor.records_alive());
}

fn report(index: u32, frame: &Frame) {
    let flash = frame
        .tag("flash.brightness")
        .and_then(|v| v.as_float())
        .unwrap_or(0.0);
    info!(
        "Frame {}: shot {} start={} exposure={}us gain={:.2} size={}x{} flash={:.1}",
        index,
        frame.id(),
        frame.exposure_start(),
        frame.exposure(),
        frame.gain(),
        frame.image().size().width,
        frame.image().size().height,
        flash
    );
}

#[cfg(feature = "metrics")]
fn serve_metrics(sensor: &Sensor, port: u16) {
    use shotline::metrics::{MetricsServer, MetricsServerConfig};

    let server = MetricsServer::new(MetricsServerConfig::with_port(port), sensor.metrics());
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to start metrics runtime: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            error!("Metrics server failed: {}", e);
        }
    });
}

#[cfg(not(feature = "metrics"))]
fn serve_metrics(_sensor: &Sensor, port: u16) {
    warn!(port, "Built without the `metrics` feature; not serving metrics");
}
