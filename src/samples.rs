use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest accelerometer reading (g)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Latest gyroscope reading (rad/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GyroSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GyroSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One sensor poll. Either reading may be missing if the device had
/// nothing to report at poll time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: i64,
    pub accel: Option<AccelSample>,
    pub gyro: Option<GyroSample>,
}

impl SensorSample {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            accel: None,
            gyro: None,
        }
    }

    pub fn with_accel(mut self, accel: AccelSample) -> Self {
        self.accel = Some(accel);
        self
    }

    pub fn with_gyro(mut self, gyro: GyroSample) -> Self {
        self.gyro = Some(gyro);
        self
    }
}

/// `<timestamp> [ax ay az] [wx wy wz]`
impl fmt::Display for SensorSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp)?;
        if let Some(a) = &self.accel {
            write!(f, " {} {} {}", a.x, a.y, a.z)?;
        }
        if let Some(g) = &self.gyro {
            write!(f, " {} {} {}", g.x, g.y, g.z)?;
        }
        Ok(())
    }
}

/// Location fix delivered by the provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// `<latitude> <longitude>`
impl fmt::Display for GpsSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sensor_line() {
        let sample = SensorSample::new(1480752000123)
            .with_accel(AccelSample::new(0.5, -0.25, 9.81))
            .with_gyro(GyroSample::new(0.01, 0.0, -0.02));

        assert_eq!(sample.to_string(), "1480752000123 0.5 -0.25 9.81 0.01 0 -0.02");
        assert_eq!(sample.to_string().split_whitespace().count(), 7);
    }

    #[test]
    fn test_partial_sensor_lines() {
        let accel_only = SensorSample::new(42).with_accel(AccelSample::new(1.0, 2.0, 3.0));
        assert_eq!(accel_only.to_string(), "42 1 2 3");

        let gyro_only = SensorSample::new(42).with_gyro(GyroSample::new(0.1, 0.2, 0.3));
        assert_eq!(gyro_only.to_string(), "42 0.1 0.2 0.3");

        assert_eq!(SensorSample::new(42).to_string(), "42");
    }

    #[test]
    fn test_gps_line() {
        let fix = GpsSample::new(39.9042, 116.4074);
        assert_eq!(fix.to_string(), "39.9042 116.4074");
    }
}
