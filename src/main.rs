use anyhow::Result;
use chrono::Local;
use clap::Parser;
use sensor_session_rs::config::{self, DirectoryNaming, SessionConfig};
use sensor_session_rs::live_status::{LiveStatus, LIVE_STATUS_FILE};
use sensor_session_rs::simulated::{SimulatedCamera, SimulatedLocation, SimulatedMotion};
use sensor_session_rs::{Devices, SessionEvent, SessionManager, SystemClock, TokioScheduler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, sleep, timeout, Duration};

#[derive(Parser, Debug)]
#[command(name = "sensor_session")]
#[command(about = "Records motion, camera and GPS streams into per-session directories", long_about = None)]
struct Args {
    /// Duration in seconds (0 = interactive)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Documents root; each session gets its own directory under it
    #[arg(long, default_value = "sensor_sessions")]
    output_dir: String,

    /// Motion sampling period
    #[arg(long, default_value_t = config::SENSOR_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(1..))]
    sensor_interval_ms: u64,

    /// Still image period
    #[arg(long, default_value_t = config::IMAGE_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(1..))]
    image_interval_ms: u64,

    /// Minimum movement in meters between GPS fixes
    #[arg(long, default_value_t = config::GPS_MIN_DISTANCE_M)]
    gps_min_distance: f64,

    /// Name session directories by full timestamp instead of hour_minute
    #[arg(long)]
    unique_dirs: bool,

    /// Keep GPS fixes that arrive while no session is running
    #[arg(long)]
    record_idle_gps: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.output_dir);
        config.sensor_interval_ms = self.sensor_interval_ms;
        config.image_interval_ms = self.image_interval_ms;
        config.gps_min_distance_m = self.gps_min_distance;
        config.record_idle_gps = self.record_idle_gps;
        if self.unique_dirs {
            config.directory_naming = DirectoryNaming::Timestamp;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Sensor Session Recorder Starting", ts_now());
    println!("  Duration: {} seconds (0=interactive)", args.duration);
    println!("  Sensor interval: {} ms", args.sensor_interval_ms);
    println!("  Image interval: {} ms", args.image_interval_ms);
    println!("  GPS min distance: {} m", args.gps_min_distance);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;
    let status_path = PathBuf::from(&args.output_dir).join(LIVE_STATUS_FILE);

    let devices = Devices {
        motion: Arc::new(SimulatedMotion::new()),
        camera: Arc::new(SimulatedCamera::new(Duration::from_millis(150))),
        location: Arc::new(SimulatedLocation::new(Duration::from_secs(1))),
    };
    let scheduler = Arc::new(TokioScheduler::current()?);
    let mut manager = SessionManager::new(args.session_config(), devices, Arc::new(SystemClock), scheduler)?;

    let available = manager.devices();
    println!(
        "  Devices: motion={} camera={} location={}",
        available.motion, available.camera, available.location
    );

    let events = tokio::spawn(report_events(manager.subscribe()));
    let started = Instant::now();

    if args.duration > 0 {
        run_timed(&mut manager, args.duration, &status_path, started).await?;
    } else {
        run_interactive(&mut manager, &status_path, started).await?;
    }

    if let Some(flush) = manager.shutdown() {
        flush.await?;
    }
    save_status(&manager, &status_path, started);

    let counts = manager.counts()?;
    println!("\n=== Final Stats ===");
    println!("Sensor samples: {}", counts.sensor_count);
    println!("Images: {}", counts.image_count);
    println!("GPS fixes: {}", counts.gps_count);

    // Let the event reporter drain before exiting
    drop(manager);
    let _ = timeout(Duration::from_secs(2), events).await;

    Ok(())
}

async fn run_timed(manager: &mut SessionManager, seconds: u64, status_path: &Path, started: Instant) -> Result<()> {
    manager.start()?;

    let deadline = sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut status_tick = interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => save_status(manager, status_path, started),
        }
    }
    Ok(())
}

async fn run_interactive(manager: &mut SessionManager, status_path: &Path, started: Instant) -> Result<()> {
    println!("Commands: start | stop | status | flush | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_tick = interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "start" => {
                        if let Err(e) = manager.start() {
                            println!("[{}] Start failed: {}", ts_now(), e);
                        }
                    }
                    "stop" => match manager.stop() {
                        Some(flush) => flush.await?,
                        None => println!("[{}] Not tracking", ts_now()),
                    },
                    "flush" => match manager.flush() {
                        Some(flush) => flush.await?,
                        None => println!("[{}] Nothing to flush", ts_now()),
                    },
                    "status" => print_status(manager, started),
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("Unknown command: {} (start | stop | status | flush | quit)", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => save_status(manager, status_path, started),
        }
    }
    Ok(())
}

async fn report_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Started { directory }) => {
                println!("[{}] Tracking into {}", ts_now(), directory.display());
            }
            Ok(SessionEvent::Stopped) => println!("[{}] Tracking stopped, saving logs...", ts_now()),
            Ok(SessionEvent::FlushComplete { directory }) => {
                println!("[{}] Logs saved to {}", ts_now(), directory.display());
            }
            Ok(SessionEvent::FlushFailed { directory, reason }) => {
                println!("[{}] Saving {} failed: {} (retry with `flush`)", ts_now(), directory.display(), reason);
            }
            Ok(SessionEvent::DirectoryFailed { path, reason }) => {
                println!("[{}] Could not create {}: {}", ts_now(), path.display(), reason);
            }
            Ok(SessionEvent::DeviceDisabled { device, reason }) => {
                println!("[{}] {} disabled: {}", ts_now(), device, reason);
            }
            Ok(SessionEvent::Starting) | Ok(SessionEvent::CountsChanged(_)) => {}
            Err(RecvError::Lagged(skipped)) => log::debug!("[events] Reporter skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_status(manager: &SessionManager, started: Instant) {
    let status = LiveStatus::from_manager(manager, started.elapsed().as_secs());
    let state = if status.tracking { "tracking" } else { "idle" };
    println!(
        "[{}] {} | sensors: {} | images: {} | gps: {} | dir: {}",
        ts_now(),
        state,
        status.sensor_samples,
        status.images,
        status.gps_fixes,
        status.directory.as_deref().unwrap_or("-")
    );
}

fn save_status(manager: &SessionManager, path: &Path, started: Instant) {
    let status = LiveStatus::from_manager(manager, started.elapsed().as_secs());
    if let Err(e) = status.save(path) {
        log::warn!("[status] Failed to write {}: {}", path.display(), e);
    }
}

fn ts_now() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
