use crate::clock::ClockSource;
use crate::devices::MotionProvider;
use crate::samples::SensorSample;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::session::{SessionCounts, SessionEvent, SessionHandle};
use std::sync::Arc;
use std::time::Duration;

/// Polls the motion provider on a fixed period and appends one line per
/// tick to the session's sensor log.
pub struct SensorSampler {
    session: SessionHandle,
    motion: Arc<dyn MotionProvider>,
    clock: Arc<dyn ClockSource>,
    available: bool,
}

impl SensorSampler {
    /// Starts the motion provider. If it refuses, the sampler stays
    /// disabled for its lifetime.
    pub fn new(session: SessionHandle, motion: Arc<dyn MotionProvider>, clock: Arc<dyn ClockSource>) -> Self {
        let available = match motion.start_updates() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[sensors] Motion updates unavailable, sampler disabled: {}", e);
                session.notify(SessionEvent::DeviceDisabled {
                    device: "motion",
                    reason: e.to_string(),
                });
                false
            }
        };

        Self {
            session,
            motion,
            clock,
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// One poll. No-op unless a session is tracking; a missing reading
    /// shortens the line but never skips it.
    pub fn tick(&self) -> Option<SessionCounts> {
        if !self.available {
            return None;
        }

        let appended = self.session.with(|session| {
            if !session.is_tracking() {
                return None;
            }

            let mut sample = SensorSample::new(self.clock.now_millis());
            if let Some(accel) = self.motion.latest_accelerometer() {
                sample = sample.with_accel(accel);
            }
            if let Some(gyro) = self.motion.latest_gyro() {
                sample = sample.with_gyro(gyro);
            }

            Some(session.push_sensor_sample(sample))
        });

        match appended {
            Ok(Some(counts)) => {
                if counts.sensor_count % 100 == 0 {
                    log::debug!("[sensors] {} samples", counts.sensor_count);
                }
                self.session.notify(SessionEvent::CountsChanged(counts));
                Some(counts)
            }
            Ok(None) => None,
            Err(e) => {
                log::error!("[sensors] Dropping tick: {}", e);
                None
            }
        }
    }

    /// Arm the periodic poll. Returns `None` when the sampler is disabled.
    pub fn arm(self: &Arc<Self>, scheduler: &dyn Scheduler, period: Duration) -> Option<TimerHandle> {
        if !self.available {
            return None;
        }
        let sampler = Arc::clone(self);
        Some(scheduler.schedule_repeating(
            "sensor-poll",
            period,
            Box::new(move || {
                sampler.tick();
            }),
        ))
    }
}
