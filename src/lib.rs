// Sensor Session Recorder
// Multi-rate motion, camera and GPS capture into per-session directories

pub mod camera;
pub mod clock;
pub mod config;
pub mod devices;
pub mod error;
pub mod live_status;
pub mod location;
pub mod manager;
pub mod samples;
pub mod scheduler;
pub mod sensors;
pub mod session;
pub mod simulated;
pub mod storage;

#[cfg(test)]
mod testing;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::{DirectoryNaming, SessionConfig};
pub use error::{DeviceError, SessionError, SessionResult};
pub use manager::{DeviceAvailability, Devices, SessionManager};
pub use samples::{AccelSample, GpsSample, GyroSample, SensorSample};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
pub use session::{SessionCounts, SessionEvent, SessionState};
