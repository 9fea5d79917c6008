use crate::clock::ClockSource;
use crate::devices::{CameraDevice, CaptureCompletion};
use crate::error::DeviceError;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::session::{SessionCounts, SessionEvent, SessionHandle};
use crate::storage;
use image::ImageFormat;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Requests one still frame per tick and writes completed frames into the
/// session directory as `<timestamp>.png`. At most one request is in flight.
pub struct ImageCapture {
    session: SessionHandle,
    camera: Arc<dyn CameraDevice>,
    clock: Arc<dyn ClockSource>,
    available: bool,
    in_flight: Arc<AtomicBool>,
}

impl ImageCapture {
    /// Opens the camera. If it refuses, capture stays disabled.
    pub fn new(session: SessionHandle, camera: Arc<dyn CameraDevice>, clock: Arc<dyn ClockSource>) -> Self {
        let available = match camera.open() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[camera] Camera unavailable, image capture disabled: {}", e);
                session.notify(SessionEvent::DeviceDisabled {
                    device: "camera",
                    reason: e.to_string(),
                });
                false
            }
        };

        Self {
            session,
            camera,
            clock,
            available,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Issue a capture request if tracking and nothing is outstanding.
    /// Returns whether a request went out.
    pub fn tick(&self) -> bool {
        if !self.available {
            return false;
        }

        let generation = match self.session.with(|s| s.is_tracking().then(|| s.generation())) {
            Ok(Some(generation)) => generation,
            Ok(None) => return false,
            Err(e) => {
                log::error!("[camera] Skipping tick: {}", e);
                return false;
            }
        };

        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("[camera] Previous capture still in flight, skipping tick");
            return false;
        }

        // Named by request time, not completion time
        let timestamp = self.clock.now_millis();
        let session = self.session.clone();
        let mut guard = InFlightGuard {
            flag: Arc::clone(&self.in_flight),
            timestamp,
            delivered: false,
        };

        let completion: CaptureCompletion = Box::new(move |result| {
            let _ = &guard;
            guard.delivered = true;
            complete_frame(&session, generation, timestamp, result);
        });

        self.camera.request_still_image(completion);
        true
    }

    /// Arm the periodic capture. Returns `None` when the camera is disabled.
    pub fn arm(self: &Arc<Self>, scheduler: &dyn Scheduler, period: Duration) -> Option<TimerHandle> {
        if !self.available {
            return None;
        }
        let capture = Arc::clone(self);
        Some(scheduler.schedule_repeating(
            "image-capture",
            period,
            Box::new(move || {
                capture.tick();
            }),
        ))
    }
}

/// Owned by a pending completion. Clears the in-flight flag when the
/// completion runs or when the device drops it without answering.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
    timestamp: i64,
    delivered: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.delivered {
            log::warn!("[camera] Capture {} abandoned by the device, frame lost", self.timestamp);
        }
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Persist one completed grab. Empty, failed, undecodable or stale frames
/// are dropped without touching the counters.
fn complete_frame(
    session: &SessionHandle,
    generation: u64,
    timestamp: i64,
    result: Result<Vec<u8>, DeviceError>,
) -> Option<SessionCounts> {
    let jpeg = match result {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => {
            log::debug!("[camera] Frame {} dropped: {}", timestamp, DeviceError::NoData);
            return None;
        }
        Err(e) => {
            log::debug!("[camera] Frame {} dropped: {}", timestamp, e);
            return None;
        }
    };

    match image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg) {
        Ok(frame) => log::trace!("[camera] Frame {} is {}x{}", timestamp, frame.width(), frame.height()),
        Err(e) => {
            log::debug!("[camera] Frame {} dropped, not a JPEG: {}", timestamp, e);
            return None;
        }
    }

    let directory = match session.with(|s| {
        if s.accepts_frame(generation) {
            s.directory().map(Path::to_path_buf)
        } else {
            None
        }
    }) {
        Ok(Some(directory)) => directory,
        Ok(None) => {
            log::debug!("[camera] Frame {} arrived after its session ended, dropped", timestamp);
            return None;
        }
        Err(e) => {
            log::warn!("[camera] Frame {} not saved: {}", timestamp, e);
            return None;
        }
    };

    // The file write happens outside the session lock
    let path = match storage::write_frame(&directory, timestamp, &jpeg) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("[camera] Frame {} not saved: {}", timestamp, e);
            return None;
        }
    };

    // Count only if the same session is still tracking, else take the file back
    match session.with(|s| s.accepts_frame(generation).then(|| s.record_image())) {
        Ok(Some(counts)) => {
            session.notify(SessionEvent::CountsChanged(counts));
            Some(counts)
        }
        Ok(None) => {
            log::debug!("[camera] Session ended while frame {} was written, removing it", timestamp);
            discard_frame(&path);
            None
        }
        Err(e) => {
            log::warn!("[camera] Frame {} not counted: {}", timestamp, e);
            discard_frame(&path);
            None
        }
    }
}

fn discard_frame(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("[camera] Could not remove {}: {}", path.display(), e);
    }
}
