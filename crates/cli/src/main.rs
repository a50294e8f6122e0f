use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use livecast::media::h264::{NAL_TYPE_IDR, nal_type, split_annex_b};
use livecast::quality::{BandwidthMonitor, PerformanceMonitor};
use livecast::{Config, PressureLevel, Server};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "livecast-server",
    about = "Live H.264 RTSP server fed from an Annex B elementary stream"
)]
struct Args {
    /// Bind address (host:port), overrides the config file
    #[arg(long, short)]
    bind: Option<String>,

    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Annex B H.264 file, looped as if it were live encoder output
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Frame rate used to pace the input, overrides the config file
    #[arg(long)]
    fps: Option<u32>,

    /// Link throughput reported to the quality controller, in kbit/s
    #[arg(long, default_value_t = 5000)]
    link_kbps: u64,
}

/// Reports the same throughput for every viewer.
struct NominalLink {
    throughput_bps: u64,
}

impl BandwidthMonitor for NominalLink {
    fn throughput_bps(&self, _client_id: &str) -> Option<u64> {
        Some(self.throughput_bps)
    }
}

/// No device telemetry on a desktop host.
struct Unloaded;

impl PerformanceMonitor for Unloaded {
    fn overall_pressure(&self) -> PressureLevel {
        PressureLevel::Normal
    }

    fn cpu_pressure(&self) -> PressureLevel {
        PressureLevel::Normal
    }
}

/// One access unit re-encoded as Annex B, plus whether it holds an IDR slice.
struct AccessUnit {
    annex_b: Vec<u8>,
    keyframe: bool,
}

/// Split an elementary stream into access units, closing one at each VCL NAL unit.
fn access_units(stream: &[u8]) -> Vec<AccessUnit> {
    let mut units = Vec::new();
    let mut current = Vec::new();
    let mut keyframe = false;

    for nal in split_annex_b(stream) {
        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(nal);
        let kind = nal_type(nal);
        keyframe |= kind == Some(NAL_TYPE_IDR);
        if matches!(kind, Some(1..=5)) {
            units.push(AccessUnit {
                annex_b: std::mem::take(&mut current),
                keyframe,
            });
            keyframe = false;
        }
    }
    units
}

fn load_config(args: &Args) -> Result<Config, livecast::ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(fps) = args.fps {
        config.server.fps = fps;
    }
    config.validate()?;
    Ok(config)
}

fn stream_file(server: &Server, units: &[AccessUnit], link: &NominalLink, stop: &AtomicBool) {
    let frame_interval = Duration::from_secs(1) / server.config().fps;
    let control_interval = server.quality().config().control_interval();
    let mut next_frame = Instant::now();
    let mut next_poll = Instant::now();

    for unit in units.iter().cycle() {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        if let Err(e) = server.send_access_unit(&unit.annex_b, unit.keyframe) {
            tracing::error!(error = %e, "failed to send access unit");
            break;
        }

        if Instant::now() >= next_poll {
            for viewer in server.viewers() {
                let profile = server.quality().poll(&viewer.session_id, link, &Unloaded);
                tracing::debug!(
                    session_id = %viewer.session_id,
                    quality = profile.quality,
                    target_fps = profile.target_fps(),
                    resolution_scale = profile.resolution_scale,
                    "viewer quality"
                );
            }
            next_poll += control_interval;
        }

        next_frame += frame_interval;
        if let Some(wait) = next_frame.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let units = match &args.input {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => access_units(&bytes),
            Err(e) => {
                eprintln!("Failed to read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Vec::new(),
    };
    if args.input.is_some() && units.is_empty() {
        eprintln!("Input contains no H.264 slices");
        return ExitCode::FAILURE;
    }

    let mut server = Server::from_config(&config);
    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut input = String::new();
            let _ = io::stdin().read_line(&mut input);
            stop.store(true, Ordering::SeqCst);
        });
    }

    println!(
        "RTSP server on {}, press Enter to stop",
        server.local_addr().map_or(config.server.bind.clone(), |a| a.to_string())
    );

    if units.is_empty() {
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    } else {
        let link = NominalLink {
            throughput_bps: args.link_kbps.saturating_mul(1000),
        };
        stream_file(&server, &units, &link, &stop);
    }

    server.stop();
    ExitCode::SUCCESS
}
