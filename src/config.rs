use crate::scheduler::MIN_PERIOD;
use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const SENSOR_INTERVAL_MS: u64 = 100;
pub const IMAGE_INTERVAL_MS: u64 = 1000;
pub const GPS_MIN_DISTANCE_M: f64 = 1.0;

/// How session directories are named under the documents root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryNaming {
    /// `<hour>_<minute>`; two starts in the same minute collide
    #[default]
    HourMinute,
    /// `%Y%m%d_%H%M%S_%3f`
    Timestamp,
}

impl DirectoryNaming {
    pub fn directory_name(self, at: &DateTime<Local>) -> String {
        match self {
            DirectoryNaming::HourMinute => format!("{}_{}", at.hour(), at.minute()),
            DirectoryNaming::Timestamp => at.format("%Y%m%d_%H%M%S_%3f").to_string(),
        }
    }
}

/// Recorder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Parent of every session directory. Must already exist.
    pub documents_root: PathBuf,
    pub sensor_interval_ms: u64,
    pub image_interval_ms: u64,
    pub gps_min_distance_m: f64,
    pub directory_naming: DirectoryNaming,
    /// Buffer GPS fixes that arrive while no session is tracking. They
    /// count toward `gps_count` but are never written: flushes use the
    /// buffers as they stood at stop, and the next start clears them.
    pub record_idle_gps: bool,
}

impl SessionConfig {
    pub fn new(documents_root: impl Into<PathBuf>) -> Self {
        Self {
            documents_root: documents_root.into(),
            ..Self::default()
        }
    }

    /// Sensor period, never shorter than 1 ms
    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms).max(MIN_PERIOD)
    }

    /// Image period, never shorter than 1 ms
    pub fn image_interval(&self) -> Duration {
        Duration::from_millis(self.image_interval_ms).max(MIN_PERIOD)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            documents_root: PathBuf::from("sensor_sessions"),
            sensor_interval_ms: SENSOR_INTERVAL_MS,
            image_interval_ms: IMAGE_INTERVAL_MS,
            gps_min_distance_m: GPS_MIN_DISTANCE_M,
            directory_naming: DirectoryNaming::HourMinute,
            record_idle_gps: false,
        }
    }
}
