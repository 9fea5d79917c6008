use crate::manager::{DeviceAvailability, SessionManager};
use crate::session::SessionCounts;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const LIVE_STATUS_FILE: &str = "live_status.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub tracking: bool,
    pub directory: Option<String>,
    pub sensor_samples: u32,
    pub images: u32,
    pub gps_fixes: u32,
    pub uptime_seconds: u64,
    // Device availability
    pub motion_available: bool,
    pub camera_available: bool,
    pub location_available: bool,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            tracking: false,
            directory: None,
            sensor_samples: 0,
            images: 0,
            gps_fixes: 0,
            uptime_seconds: 0,
            motion_available: false,
            camera_available: false,
            location_available: false,
        }
    }

    /// Snapshot the recorder. Counters read as zero if the session lock
    /// is poisoned.
    pub fn from_manager(manager: &SessionManager, uptime_seconds: u64) -> Self {
        let counts = manager.counts().unwrap_or_default();
        let directory = manager
            .directory()
            .ok()
            .flatten()
            .map(|d| d.display().to_string());

        let mut status = Self::new();
        status.tracking = manager.is_tracking();
        status.directory = directory;
        status.uptime_seconds = uptime_seconds;
        status.set_counts(counts);
        status.set_devices(manager.devices());
        status
    }

    fn set_counts(&mut self, counts: SessionCounts) {
        self.sensor_samples = counts.sensor_count;
        self.images = counts.image_count;
        self.gps_fixes = counts.gps_count;
    }

    fn set_devices(&mut self, devices: DeviceAvailability) {
        self.motion_available = devices.motion;
        self.camera_available = devices.camera;
        self.location_available = devices.location;
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
