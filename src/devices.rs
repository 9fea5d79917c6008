//! Collaborator interfaces the recorder consumes. Concrete devices live
//! outside the crate (or in `simulated` for the demo binary).

use crate::error::DeviceError;
use crate::samples::{AccelSample, GpsSample, GyroSample};

/// Accelerometer + gyroscope source
pub trait MotionProvider: Send + Sync {
    /// Begin streaming both sensors. Called once when the recorder is built.
    fn start_updates(&self) -> Result<(), DeviceError>;

    /// Most recent accelerometer reading, if any has arrived yet
    fn latest_accelerometer(&self) -> Option<AccelSample>;

    /// Most recent gyroscope reading, if any has arrived yet
    fn latest_gyro(&self) -> Option<GyroSample>;
}

/// Delivers the encoded JPEG bytes of one still frame, or why there are none
pub type CaptureCompletion = Box<dyn FnOnce(Result<Vec<u8>, DeviceError>) + Send + 'static>;

/// Still-image camera
pub trait CameraDevice: Send + Sync {
    /// Prepare the capture pipeline. Called once when the recorder is built.
    fn open(&self) -> Result<(), DeviceError>;

    /// Request one still frame. Must return immediately; `completion` runs
    /// later, possibly on another thread.
    fn request_still_image(&self, completion: CaptureCompletion);
}

/// Called for every fix that passes the provider's distance filter
pub type FixCallback = Box<dyn Fn(GpsSample) + Send + Sync + 'static>;

/// Geolocation source with a minimum-distance filter
pub trait LocationProvider: Send + Sync {
    /// Start delivering fixes at least `min_distance_m` apart
    fn start_updates(&self, min_distance_m: f64, on_fix: FixCallback) -> Result<(), DeviceError>;

    fn stop_updates(&self);
}
