use crate::camera::ImageCapture;
use crate::clock::ClockSource;
use crate::config::SessionConfig;
use crate::devices::{CameraDevice, LocationProvider, MotionProvider};
use crate::error::{SessionError, SessionResult};
use crate::location::LocationTracker;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::sensors::SensorSampler;
use crate::session::{SessionCounts, SessionEvent, SessionHandle, SessionState};
use crate::storage::{self, SessionLogs};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The three hardware collaborators
pub struct Devices {
    pub motion: Arc<dyn MotionProvider>,
    pub camera: Arc<dyn CameraDevice>,
    pub location: Arc<dyn LocationProvider>,
}

/// Which producers survived device initialisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceAvailability {
    pub motion: bool,
    pub camera: bool,
    pub location: bool,
}

/// Owns the session and drives the sensor, image and location producers
/// through start/stop.
pub struct SessionManager {
    config: SessionConfig,
    session: SessionHandle,
    clock: Arc<dyn ClockSource>,
    scheduler: Arc<dyn Scheduler>,
    runtime: Handle,
    sampler: Arc<SensorSampler>,
    capture: Arc<ImageCapture>,
    tracker: Arc<LocationTracker>,
    sensor_timer: Option<TimerHandle>,
    image_timer: Option<TimerHandle>,
}

impl SessionManager {
    /// Bring up the devices and start location tracking. Must be called
    /// from inside a tokio runtime; flushes run on it.
    pub fn new(
        config: SessionConfig,
        devices: Devices,
        clock: Arc<dyn ClockSource>,
        scheduler: Arc<dyn Scheduler>,
    ) -> SessionResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SessionError::Internal(format!("No tokio runtime: {}", e)))?;
        let session = SessionHandle::new();

        let sampler = Arc::new(SensorSampler::new(session.clone(), devices.motion, Arc::clone(&clock)));
        let capture = Arc::new(ImageCapture::new(session.clone(), devices.camera, Arc::clone(&clock)));
        let tracker = Arc::new(LocationTracker::new(
            session.clone(),
            devices.location,
            config.gps_min_distance_m,
            config.record_idle_gps,
        ));
        tracker.start();

        log::info!(
            "[session] Recorder ready under {} (sensors every {} ms, images every {} ms)",
            config.documents_root.display(),
            config.sensor_interval_ms,
            config.image_interval_ms
        );

        Ok(Self {
            config,
            session,
            clock,
            scheduler,
            runtime,
            sampler,
            capture,
            tracker,
            sensor_timer: None,
            image_timer: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_tracking()
    }

    pub fn state(&self) -> SessionResult<SessionState> {
        self.session.with(|s| s.state())
    }

    pub fn counts(&self) -> SessionResult<SessionCounts> {
        self.session.counts()
    }

    pub fn directory(&self) -> SessionResult<Option<PathBuf>> {
        self.session.with(|s| s.directory().map(|d| d.to_path_buf()))
    }

    pub fn devices(&self) -> DeviceAvailability {
        DeviceAvailability {
            motion: self.sampler.is_available(),
            camera: self.capture.is_available(),
            location: self.tracker.is_running(),
        }
    }

    /// Begin a new session. No-op if one is already tracking.
    ///
    /// The directory is created non-recursively; if it already exists (two
    /// starts within the same minute) the start is refused rather than
    /// merging into the old session.
    pub fn start(&mut self) -> SessionResult<()> {
        if self.session.is_tracking() {
            log::debug!("[session] Start ignored, already tracking");
            return Ok(());
        }
        self.session.notify(SessionEvent::Starting);

        let name = self.config.directory_naming.directory_name(&self.clock.local_now());
        let directory = self.config.documents_root.join(name);

        if let Err(e) = storage::create_session_dir(&directory) {
            log::error!("[session] {}", e);
            self.session.notify(SessionEvent::DirectoryFailed {
                path: directory,
                reason: e.to_string(),
            });
            return Err(e);
        }

        let generation = self.session.with(|s| s.begin(directory.clone()))?;

        self.sensor_timer = self.sampler.arm(self.scheduler.as_ref(), self.config.sensor_interval());
        self.image_timer = self.capture.arm(self.scheduler.as_ref(), self.config.image_interval());

        log::info!("[session] Session {} tracking into {}", generation, directory.display());
        self.session.notify(SessionEvent::Started { directory });
        self.session.notify(SessionEvent::CountsChanged(SessionCounts::default()));
        Ok(())
    }

    /// End the session and flush both logs in the background. No-op if
    /// nothing is tracking. The returned task finishes when the flush does;
    /// its outcome is reported as a `FlushComplete` / `FlushFailed` event.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        // End tracking and snapshot the logs under one lock
        let ended = self.session.with(|s| {
            if !s.end() {
                return None;
            }
            let logs = s.stopped_logs()?;
            s.directory().map(|d| (d.to_path_buf(), logs))
        });

        let snapshot = match ended {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                log::debug!("[session] Stop ignored, not tracking");
                return None;
            }
            Err(e) => {
                log::error!("[session] Stop failed: {}", e);
                return None;
            }
        };

        if let Some(mut timer) = self.image_timer.take() {
            timer.cancel();
        }
        if let Some(mut timer) = self.sensor_timer.take() {
            timer.cancel();
        }

        log::info!("[session] Tracking stopped");
        self.session.notify(SessionEvent::Stopped);

        let (directory, logs) = snapshot;
        Some(self.spawn_flush(directory, logs))
    }

    /// Write the last stopped session's buffers again, e.g. after a failed
    /// flush. Writes what the buffers held at stop. No-op while tracking or
    /// before any session.
    pub fn flush(&self) -> Option<JoinHandle<()>> {
        let snapshot = self.session.with(|s| {
            let logs = s.stopped_logs()?;
            s.directory().map(|d| (d.to_path_buf(), logs))
        });

        match snapshot {
            Ok(Some((directory, logs))) => Some(self.spawn_flush(directory, logs)),
            Ok(None) => {
                log::debug!("[session] Nothing to flush");
                None
            }
            Err(e) => {
                log::error!("[session] Flush failed: {}", e);
                None
            }
        }
    }

    /// Stop any running session and release the location provider
    pub fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        let flush = self.stop();
        self.tracker.stop();
        flush
    }

    fn spawn_flush(&self, directory: PathBuf, logs: SessionLogs) -> JoinHandle<()> {
        let session = self.session.clone();

        self.runtime.spawn(async move {
            let target = directory.clone();
            let outcome = tokio::task::spawn_blocking(move || storage::write_session_logs(&target, &logs))
                .await
                .map_err(|e| SessionError::FlushTask(e.to_string()))
                .and_then(|written| written);

            match outcome {
                Ok(report) => {
                    log::info!(
                        "[session] Flushed {} sensor lines and {} GPS lines to {}",
                        report.sensor_lines,
                        report.gps_lines,
                        directory.display()
                    );
                    session.notify(SessionEvent::FlushComplete { directory });
                }
                Err(e) => {
                    log::error!("[session] Flush to {} failed: {}", directory.display(), e);
                    session.notify(SessionEvent::FlushFailed {
                        directory,
                        reason: e.to_string(),
                    });
                }
            }
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.tracker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DirectoryNaming;
    use crate::error::DeviceError;
    use crate::samples::GpsSample;
    use crate::scheduler::ManualScheduler;
    use crate::storage::{GPS_FILE, SENSOR_FILE};
    use crate::testing::{test_jpeg, FakeCamera, FakeLocation, FakeMotion};
    use std::fs;
    use std::time::Duration;

    struct Rig {
        root: tempfile::TempDir,
        clock: Arc<ManualClock>,
        scheduler: Arc<ManualScheduler>,
        motion: Arc<FakeMotion>,
        camera: Arc<FakeCamera>,
        location: Arc<FakeLocation>,
        manager: SessionManager,
    }

    fn rig_with(camera: FakeCamera, record_idle_gps: bool) -> Rig {
        let root = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_480_752_000_000));
        let scheduler = Arc::new(ManualScheduler::new());
        let motion = Arc::new(FakeMotion::full());
        let camera = Arc::new(camera);
        let location = Arc::new(FakeLocation::new());

        let mut config = SessionConfig::new(root.path());
        config.record_idle_gps = record_idle_gps;

        let devices = Devices {
            motion: motion.clone(),
            camera: camera.clone(),
            location: location.clone(),
        };
        let manager = SessionManager::new(config, devices, clock.clone(), scheduler.clone()).unwrap();

        Rig {
            root,
            clock,
            scheduler,
            motion,
            camera,
            location,
            manager,
        }
    }

    fn rig() -> Rig {
        rig_with(FakeCamera::new(), false)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn assert_counts_match_buffers(manager: &SessionManager) {
        manager
            .session()
            .with(|s| {
                let counts = s.counts();
                assert_eq!(counts.sensor_count as usize, s.sensor_samples().len());
                assert_eq!(counts.gps_count as usize, s.gps_samples().len());
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_creates_minute_directory() {
        let mut r = rig();
        let mut rx = r.manager.subscribe();

        r.manager.start().unwrap();

        let expected = r
            .root
            .path()
            .join(DirectoryNaming::HourMinute.directory_name(&r.clock.local_now()));
        assert!(expected.is_dir());
        assert_eq!(r.manager.directory().unwrap(), Some(expected.clone()));
        assert!(r.manager.is_tracking());
        assert_eq!(r.manager.counts().unwrap(), SessionCounts::default());
        assert_eq!(r.scheduler.armed(), 2);

        let events = drain(&mut rx);
        assert_eq!(events[0], SessionEvent::Starting);
        assert_eq!(events[1], SessionEvent::Started { directory: expected });
    }

    #[tokio::test]
    async fn test_start_while_tracking_is_noop() {
        let mut r = rig();
        r.manager.start().unwrap();
        r.scheduler.advance(Duration::from_millis(300));
        let directory = r.manager.directory().unwrap();

        r.clock.advance(60_000);
        r.manager.start().unwrap();

        assert_eq!(r.manager.counts().unwrap().sensor_count, 3);
        assert_eq!(r.manager.directory().unwrap(), directory);
        assert_eq!(r.scheduler.armed(), 2);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let mut r = rig();
        let mut rx = r.manager.subscribe();

        assert!(r.manager.stop().is_none());
        assert!(drain(&mut rx).is_empty());
        assert!(r.manager.flush().is_none());
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let mut r = rig();
        let mut rx = r.manager.subscribe();
        r.manager.start().unwrap();
        let directory = r.manager.directory().unwrap().unwrap();

        // Three full ticks, then one with the gyro missing
        for _ in 0..3 {
            r.clock.advance(100);
            r.scheduler.advance(Duration::from_millis(100));
        }
        r.motion.set_gyro(None);
        r.clock.advance(100);
        r.scheduler.advance(Duration::from_millis(100));

        // Two moves past the 1 m filter, one that the provider rejects
        assert!(r.location.emit(GpsSample::new(30.0, 120.0)));
        assert!(r.location.emit(GpsSample::new(30.0001, 120.0001)));
        assert!(!r.location.emit(GpsSample::new(30.0001001, 120.0001)));

        let counts = r.manager.counts().unwrap();
        assert_eq!(counts.sensor_count, 4);
        assert_eq!(counts.gps_count, 2);
        assert_counts_match_buffers(&r.manager);

        let logs = r.manager.session().with(|s| s.logs()).unwrap();
        assert!(logs.sensor_lines[3].split_whitespace().count() < logs.sensor_lines[0].split_whitespace().count());

        let flush = r.manager.stop().unwrap();
        assert!(!r.manager.is_tracking());
        assert_eq!(r.scheduler.armed(), 0);

        // Ticks after stop add nothing
        r.scheduler.advance(Duration::from_secs(2));
        flush.await.unwrap();

        let sensors = fs::read_to_string(directory.join(SENSOR_FILE)).unwrap();
        assert_eq!(sensors, logs.sensor_lines.join("\n"));
        assert_eq!(sensors.lines().count(), 4);
        let gps = fs::read_to_string(directory.join(GPS_FILE)).unwrap();
        assert_eq!(gps, "30 120\n30.0001 120.0001");

        // Buffers stay readable after stop
        assert_eq!(r.manager.counts().unwrap().sensor_count, 4);

        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::Stopped));
        assert_eq!(events.last(), Some(&SessionEvent::FlushComplete { directory }));
    }

    #[tokio::test]
    async fn test_restart_clears_previous_session() {
        let mut r = rig();
        r.manager.start().unwrap();
        r.scheduler.advance(Duration::from_millis(500));
        r.location.emit(GpsSample::new(30.0, 120.0));
        assert_eq!(r.manager.counts().unwrap().sensor_count, 5);

        r.manager.stop().unwrap().await.unwrap();

        r.clock.advance(60_000);
        r.manager.start().unwrap();
        assert_eq!(r.manager.counts().unwrap(), SessionCounts::default());
        r.manager.session().with(|s| {
            assert!(s.sensor_samples().is_empty());
            assert!(s.gps_samples().is_empty());
        }).unwrap();
    }

    #[tokio::test]
    async fn test_same_minute_restart_fails_loudly() {
        let mut r = rig();
        r.manager.start().unwrap();
        r.scheduler.advance(Duration::from_millis(200));
        r.manager.stop().unwrap().await.unwrap();
        let mut rx = r.manager.subscribe();

        let err = r.manager.start().unwrap_err();
        assert!(matches!(err, SessionError::Directory { .. }));
        assert!(!r.manager.is_tracking());
        assert_eq!(r.scheduler.armed(), 0);

        // The earlier session's data is untouched
        assert_eq!(r.manager.counts().unwrap().sensor_count, 2);
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(SessionEvent::DirectoryFailed { .. })));
    }

    #[tokio::test]
    async fn test_missing_root_fails_start() {
        let mut r = rig();
        r.manager.config.documents_root = r.root.path().join("does").join("not-exist");

        let err = r.manager.start().unwrap_err();
        assert!(matches!(err, SessionError::Directory { .. }));
        assert!(!r.manager.is_tracking());
        assert_eq!(r.manager.directory().unwrap(), None);
    }

    #[tokio::test]
    async fn test_timestamp_naming_avoids_collisions() {
        let mut r = rig();
        r.manager.config.directory_naming = DirectoryNaming::Timestamp;

        r.manager.start().unwrap();
        r.manager.stop().unwrap().await.unwrap();
        r.clock.advance(1);
        r.manager.start().unwrap();

        assert_eq!(fs::read_dir(r.root.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_images_counted_as_written() {
        let mut r = rig();
        r.manager.start().unwrap();
        let directory = r.manager.directory().unwrap().unwrap();

        r.scheduler.advance(Duration::from_millis(1000));
        assert_eq!(r.camera.pending(), 1);
        let requested_at = r.clock.now_millis();
        r.clock.advance(300);
        r.camera.complete_next(Ok(test_jpeg(16, 16)));

        // A second tick while nothing is outstanding, then a failed grab
        r.scheduler.advance(Duration::from_millis(1000));
        r.camera.complete_next(Err(DeviceError::CaptureFailed("timeout".to_string())));

        assert_eq!(r.manager.counts().unwrap().image_count, 1);
        assert!(directory.join(format!("{}.png", requested_at)).is_file());

        let flush = r.manager.stop().unwrap();
        flush.await.unwrap();

        let frames = fs::read_dir(&directory)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "png"))
            .count();
        assert_eq!(frames as u32, r.manager.counts().unwrap().image_count);
    }

    #[tokio::test]
    async fn test_capture_in_flight_at_stop_is_dropped() {
        let mut r = rig();
        r.manager.start().unwrap();
        let directory = r.manager.directory().unwrap().unwrap();

        r.scheduler.advance(Duration::from_millis(1000));
        let flush = r.manager.stop().unwrap();
        r.camera.complete_next(Ok(test_jpeg(8, 8)));
        flush.await.unwrap();

        assert_eq!(r.manager.counts().unwrap().image_count, 0);
        let frames = fs::read_dir(&directory)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "png"))
            .count();
        assert_eq!(frames, 0);
    }

    #[tokio::test]
    async fn test_failed_flush_reported_and_retryable() {
        let mut r = rig();
        r.manager.start().unwrap();
        r.scheduler.advance(Duration::from_millis(300));
        let directory = r.manager.directory().unwrap().unwrap();
        fs::remove_dir_all(&directory).unwrap();

        let mut rx = r.manager.subscribe();
        r.manager.stop().unwrap().await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(SessionEvent::FlushFailed { .. })));
        assert_eq!(r.manager.counts().unwrap().sensor_count, 3);

        fs::create_dir(&directory).unwrap();
        r.manager.flush().unwrap().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&SessionEvent::FlushComplete { directory: directory.clone() }));
        let sensors = fs::read_to_string(directory.join(SENSOR_FILE)).unwrap();
        assert_eq!(sensors.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_flush_retry_ignores_fixes_after_stop() {
        let mut r = rig_with(FakeCamera::new(), true);
        r.manager.start().unwrap();
        let directory = r.manager.directory().unwrap().unwrap();
        r.location.emit(GpsSample::new(30.0, 120.0));

        r.manager.stop().unwrap().await.unwrap();

        // Idle recording keeps buffering after the stop
        r.location.emit(GpsSample::new(30.001, 120.0));
        assert_eq!(r.manager.counts().unwrap().gps_count, 2);

        r.manager.flush().unwrap().await.unwrap();
        let gps = fs::read_to_string(directory.join(GPS_FILE)).unwrap();
        assert_eq!(gps, "30 120");
    }

    #[tokio::test]
    async fn test_abandoned_capture_does_not_stall_later_sessions() {
        let mut r = rig();
        r.manager.start().unwrap();
        r.scheduler.advance(Duration::from_millis(1000));
        assert_eq!(r.camera.requests(), 1);
        assert!(r.camera.drop_next());
        r.manager.stop().unwrap().await.unwrap();

        r.clock.advance(60_000);
        r.manager.start().unwrap();
        r.scheduler.advance(Duration::from_millis(1000));
        assert_eq!(r.camera.requests(), 2);
        r.camera.complete_next(Ok(test_jpeg(8, 8)));
        assert_eq!(r.manager.counts().unwrap().image_count, 1);
    }

    #[tokio::test]
    async fn test_unavailable_camera_leaves_other_producers_running() {
        let mut r = rig_with(FakeCamera::failing(DeviceError::Unavailable("camera".to_string())), false);
        assert!(!r.manager.devices().camera);
        assert!(r.manager.devices().motion);

        r.manager.start().unwrap();
        assert_eq!(r.scheduler.armed(), 1);

        r.scheduler.advance(Duration::from_secs(2));
        let counts = r.manager.counts().unwrap();
        assert_eq!(counts.sensor_count, 20);
        assert_eq!(counts.image_count, 0);
        assert_eq!(r.camera.requests(), 0);
    }

    #[tokio::test]
    async fn test_gps_between_sessions() {
        let mut r = rig();
        r.location.emit(GpsSample::new(30.0, 120.0));
        assert_eq!(r.manager.counts().unwrap().gps_count, 0);

        let idle = rig_with(FakeCamera::new(), true);
        idle.location.emit(GpsSample::new(30.0, 120.0));
        assert_eq!(idle.manager.counts().unwrap().gps_count, 1);

        r.manager.start().unwrap();
        r.location.emit(GpsSample::new(30.001, 120.0));
        assert_eq!(r.manager.counts().unwrap().gps_count, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_stops_location() {
        let mut r = rig();
        r.manager.start().unwrap();
        assert!(r.location.is_running());
        assert!(r.manager.devices().location);

        let flush = r.manager.shutdown().unwrap();
        flush.await.unwrap();

        assert!(!r.location.is_running());
        assert!(!r.manager.is_tracking());
        assert_eq!(r.manager.state().unwrap(), SessionState::Idle);
    }
}
