//! Synthetic devices so the recorder runs on a machine with no sensors.

use crate::devices::{CameraDevice, CaptureCompletion, FixCallback, LocationProvider, MotionProvider};
use crate::error::DeviceError;
use crate::location::DistanceFilter;
use crate::samples::{AccelSample, GpsSample, GyroSample};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Slow sinusoidal motion, gravity on -z. Every 50th gyro read comes back
/// empty to mimic a sensor that has not reported yet.
#[derive(Default)]
pub struct SimulatedMotion {
    started: AtomicBool,
    accel_reads: AtomicU64,
    gyro_reads: AtomicU64,
}

impl SimulatedMotion {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MotionProvider for SimulatedMotion {
    fn start_updates(&self) -> Result<(), DeviceError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn latest_accelerometer(&self) -> Option<AccelSample> {
        if !self.started.load(Ordering::SeqCst) {
            return None;
        }
        let t = self.accel_reads.fetch_add(1, Ordering::Relaxed) as f64 * 0.1;

        Some(AccelSample::new(
            (t * 2.0 * PI).sin() * 0.05,
            (t * 2.0 * PI).cos() * 0.03,
            -1.0 + (t * PI).sin() * 0.01,
        ))
    }

    fn latest_gyro(&self) -> Option<GyroSample> {
        if !self.started.load(Ordering::SeqCst) {
            return None;
        }
        let seq = self.gyro_reads.fetch_add(1, Ordering::Relaxed);
        if seq % 50 == 49 {
            return None;
        }
        let t = seq as f64 * 0.1;

        Some(GyroSample::new(
            (t * 0.5).sin() * 0.05,
            (t * 0.3).cos() * 0.03,
            t.sin() * 0.1,
        ))
    }
}

/// Camera producing 640x480 gradient JPEGs on a background thread after
/// a fixed latency
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    latency: Duration,
    frames: AtomicU64,
}

impl SimulatedCamera {
    pub fn new(latency: Duration) -> Self {
        Self {
            width: 640,
            height: 480,
            latency,
            frames: AtomicU64::new(0),
        }
    }
}

fn render_frame(width: u32, height: u32, seq: u64) -> Result<Vec<u8>, DeviceError> {
    let shift = (seq * 16) as u32;
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            rgb.push(((x + shift) % 256) as u8);
            rgb.push((y % 256) as u8);
            rgb.push(((x + y) % 256) as u8);
        }
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 80)
        .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| DeviceError::CaptureFailed(e.to_string()))?;
    Ok(jpeg)
}

impl CameraDevice for SimulatedCamera {
    fn open(&self) -> Result<(), DeviceError> {
        log::info!("[camera] Simulated camera ready at {}x{}", self.width, self.height);
        Ok(())
    }

    fn request_still_image(&self, completion: CaptureCompletion) {
        let (width, height, latency) = (self.width, self.height, self.latency);
        let seq = self.frames.fetch_add(1, Ordering::Relaxed);

        std::thread::spawn(move || {
            std::thread::sleep(latency);
            completion(render_frame(width, height, seq));
        });
    }
}

/// Walks north-east in ~1.4 m steps once a second, standing still every
/// fourth second so the distance filter has something to reject
pub struct SimulatedLocation {
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedLocation {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: Mutex::new(None),
        }
    }
}

impl LocationProvider for SimulatedLocation {
    fn start_updates(&self, min_distance_m: f64, on_fix: FixCallback) -> Result<(), DeviceError> {
        let runtime = Handle::try_current().map_err(|e| DeviceError::Unavailable(format!("location ({})", e)))?;
        let period = self.period;

        let join = runtime.spawn(async move {
            let mut filter = DistanceFilter::new(min_distance_m);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = 0u64;
            let mut steps = 0u64;
            let mut delivered = 0u64;

            loop {
                ticker.tick().await;
                if ticks % 4 != 3 {
                    steps += 1;
                }
                ticks += 1;

                let step = steps as f64;
                let fix = GpsSample::new(37.7749 + step * 0.00001, -122.4194 + step * 0.00001);

                if filter.accept(fix) {
                    delivered += 1;
                    if delivered % 10 == 0 {
                        log::debug!("[gps] {} simulated fixes delivered", delivered);
                    }
                    on_fix(fix);
                } else {
                    log::trace!("[gps] Fix within {} m of the last one, filtered", min_distance_m);
                }
            }
        });

        let mut task = self
            .task
            .lock()
            .map_err(|_| DeviceError::Unavailable("location task lock".to_string()))?;
        if let Some(previous) = task.replace(join) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_updates(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(join) = task.take() {
                join.abort();
            }
        }
    }
}
