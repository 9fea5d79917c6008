use crate::devices::{FixCallback, LocationProvider};
use crate::samples::GpsSample;
use crate::session::{SessionCounts, SessionEvent, SessionHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters
pub fn haversine_distance(a: &GpsSample, b: &GpsSample) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h past 1 near antipodes
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Minimum-distance gate a provider applies before reporting a fix.
/// The first fix always passes.
#[derive(Debug, Clone)]
pub struct DistanceFilter {
    min_distance_m: f64,
    last: Option<GpsSample>,
}

impl DistanceFilter {
    pub fn new(min_distance_m: f64) -> Self {
        Self {
            min_distance_m,
            last: None,
        }
    }

    pub fn accept(&mut self, fix: GpsSample) -> bool {
        let moved = match &self.last {
            None => true,
            Some(prev) => haversine_distance(prev, &fix) >= self.min_distance_m,
        };
        if moved {
            self.last = Some(fix);
        }
        moved
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Receives fixes from the location provider and appends them to the
/// session's GPS log. Runs for the life of the recorder, not per session.
pub struct LocationTracker {
    session: SessionHandle,
    provider: Arc<dyn LocationProvider>,
    min_distance_m: f64,
    record_idle: bool,
    running: AtomicBool,
}

impl LocationTracker {
    pub fn new(
        session: SessionHandle,
        provider: Arc<dyn LocationProvider>,
        min_distance_m: f64,
        record_idle: bool,
    ) -> Self {
        Self {
            session,
            provider,
            min_distance_m,
            record_idle,
            running: AtomicBool::new(false),
        }
    }

    /// Subscribe to the provider. Returns false if the provider is unavailable.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return true;
        }

        let tracker = Arc::downgrade(self);
        let on_fix: FixCallback = Box::new(move |fix| {
            if let Some(tracker) = tracker.upgrade() {
                tracker.handle_fix(fix);
            }
        });

        match self.provider.start_updates(self.min_distance_m, on_fix) {
            Ok(()) => {
                log::info!("[gps] Location updates started (min distance {} m)", self.min_distance_m);
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                log::warn!("[gps] Location updates unavailable: {}", e);
                self.session.notify(SessionEvent::DeviceDisabled {
                    device: "location",
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.provider.stop_updates();
            log::info!("[gps] Location updates stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record one accepted fix. Fixes arriving while idle are dropped
    /// unless idle recording is enabled.
    pub fn handle_fix(&self, fix: GpsSample) -> Option<SessionCounts> {
        let appended = self.session.with(|session| {
            if !session.is_tracking() && !self.record_idle {
                return None;
            }
            Some(session.push_gps_sample(fix))
        });

        match appended {
            Ok(Some(counts)) => {
                log::debug!("[gps] {} fixes", counts.gps_count);
                self.session.notify(SessionEvent::CountsChanged(counts));
                Some(counts)
            }
            Ok(None) => None,
            Err(e) => {
                log::error!("[gps] Dropping fix: {}", e);
                None
            }
        }
    }
}
