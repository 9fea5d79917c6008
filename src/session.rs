use crate::error::{SessionError, SessionResult};
use crate::samples::{GpsSample, SensorSample};
use crate::storage::SessionLogs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session running; buffers of the last session stay readable
    Idle,
    /// Producers are appending to the buffers
    Tracking,
}

/// Per-stream sample counters reported to observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub sensor_count: u32,
    pub image_count: u32,
    pub gps_count: u32,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A start command was accepted
    Starting,
    /// Directory created, producers armed
    Started { directory: PathBuf },
    CountsChanged(SessionCounts),
    /// Tracking ended; flush is about to run
    Stopped,
    DirectoryFailed { path: PathBuf, reason: String },
    FlushComplete { directory: PathBuf },
    FlushFailed { directory: PathBuf, reason: String },
    DeviceDisabled { device: &'static str, reason: String },
}

/// Recording session: directory, counters and in-memory logs
#[derive(Debug)]
pub struct Session {
    directory: Option<PathBuf>,
    state: SessionState,
    generation: u64,
    counts: SessionCounts,
    sensor_samples: Vec<SensorSample>,
    gps_samples: Vec<GpsSample>,
    /// Buffer lengths when the last session stopped
    stopped_at: Option<(usize, usize)>,
}

impl Session {
    /// Create new session in Idle state
    pub fn new() -> Self {
        Session {
            directory: None,
            state: SessionState::Idle,
            generation: 0,
            counts: SessionCounts::default(),
            sensor_samples: Vec::with_capacity(1024),
            gps_samples: Vec::with_capacity(128),
            stopped_at: None,
        }
    }

    /// Idle → Tracking: fresh directory, cleared buffers, zeroed counters.
    /// Returns the new session generation.
    pub(crate) fn begin(&mut self, directory: PathBuf) -> u64 {
        self.directory = Some(directory);
        self.sensor_samples.clear();
        self.gps_samples.clear();
        self.counts = SessionCounts::default();
        self.stopped_at = None;
        self.generation += 1;
        self.state = SessionState::Tracking;
        self.generation
    }

    /// Tracking → Idle. Returns false if nothing was tracking.
    pub(crate) fn end(&mut self) -> bool {
        match self.state {
            SessionState::Tracking => {
                self.state = SessionState::Idle;
                self.stopped_at = Some((self.sensor_samples.len(), self.gps_samples.len()));
                true
            }
            SessionState::Idle => false,
        }
    }

    pub(crate) fn push_sensor_sample(&mut self, sample: SensorSample) -> SessionCounts {
        self.sensor_samples.push(sample);
        self.counts.sensor_count += 1;
        self.counts
    }

    pub(crate) fn push_gps_sample(&mut self, sample: GpsSample) -> SessionCounts {
        self.gps_samples.push(sample);
        self.counts.gps_count += 1;
        self.counts
    }

    pub(crate) fn record_image(&mut self) -> SessionCounts {
        self.counts.image_count += 1;
        self.counts
    }

    /// Whether a frame requested during `generation` may still be written
    pub fn accepts_frame(&self, generation: u64) -> bool {
        self.is_tracking() && self.generation == generation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == SessionState::Tracking
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn counts(&self) -> SessionCounts {
        self.counts
    }

    pub fn sensor_samples(&self) -> &[SensorSample] {
        &self.sensor_samples
    }

    pub fn gps_samples(&self) -> &[GpsSample] {
        &self.gps_samples
    }

    /// Rendered copy of both buffers as they are now
    pub fn logs(&self) -> SessionLogs {
        render(&self.sensor_samples, &self.gps_samples)
    }

    /// Buffers as they stood when the last session stopped. Idle GPS fixes
    /// appended afterwards are left out. `None` while tracking or before
    /// any session has stopped.
    pub fn stopped_logs(&self) -> Option<SessionLogs> {
        let (sensors, gps) = self.stopped_at?;
        Some(render(&self.sensor_samples[..sensors], &self.gps_samples[..gps]))
    }
}

fn render(sensors: &[SensorSample], gps: &[GpsSample]) -> SessionLogs {
    SessionLogs {
        sensor_lines: sensors.iter().map(ToString::to_string).collect(),
        gps_lines: gps.iter().map(ToString::to_string).collect(),
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the one live session plus its notification channel.
/// The manager owns the session; producers get clones of this handle.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            events,
        }
    }

    /// Run `f` with the session locked
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> SessionResult<R> {
        let mut session = self.session.lock().map_err(|_| SessionError::lock("session"))?;
        Ok(f(&mut session))
    }

    pub fn is_tracking(&self) -> bool {
        self.with(|s| s.is_tracking()).unwrap_or(false)
    }

    pub fn counts(&self) -> SessionResult<SessionCounts> {
        self.with(|s| s.counts())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Broadcast to observers. Having none is fine.
    pub fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}
