use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SENSOR_FILE: &str = "sensors.txt";
pub const GPS_FILE: &str = "gps.txt";

/// Rendered sensor and GPS logs of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLogs {
    pub sensor_lines: Vec<String>,
    pub gps_lines: Vec<String>,
}

/// What a successful flush wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub sensor_path: PathBuf,
    pub gps_path: PathBuf,
    pub sensor_lines: usize,
    pub gps_lines: usize,
}

/// Create the session directory. Not recursive: a missing parent or an
/// existing directory with the same name is an error.
pub fn create_session_dir(path: &Path) -> SessionResult<()> {
    fs::create_dir(path).map_err(|source| SessionError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `sensors.txt` and `gps.txt` into `directory`, newline-joined UTF-8
pub fn write_session_logs(directory: &Path, logs: &SessionLogs) -> SessionResult<FlushReport> {
    let sensor_path = directory.join(SENSOR_FILE);
    let gps_path = directory.join(GPS_FILE);

    write_lines(&sensor_path, &logs.sensor_lines)?;
    write_lines(&gps_path, &logs.gps_lines)?;

    Ok(FlushReport {
        sensor_path,
        gps_path,
        sensor_lines: logs.sensor_lines.len(),
        gps_lines: logs.gps_lines.len(),
    })
}

fn write_lines(path: &Path, lines: &[String]) -> SessionResult<()> {
    fs::write(path, lines.join("\n")).map_err(|source| SessionError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Frames keep the `.png` name even though the payload is JPEG
pub fn frame_file_name(timestamp: i64) -> String {
    format!("{}.png", timestamp)
}

/// Persist encoded frame bytes as delivered, no re-encoding
pub fn write_frame(directory: &Path, timestamp: i64, jpeg: &[u8]) -> SessionResult<PathBuf> {
    let path = directory.join(frame_file_name(timestamp));
    fs::write(&path, jpeg).map_err(|source| SessionError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
