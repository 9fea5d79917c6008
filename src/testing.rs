//! Deterministic devices for unit tests.

use crate::devices::{CameraDevice, CaptureCompletion, FixCallback, LocationProvider, MotionProvider};
use crate::error::DeviceError;
use crate::location::DistanceFilter;
use crate::samples::{AccelSample, GpsSample, GyroSample};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Encode a small gradient frame
pub fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            rgb.extend_from_slice(&[(x * 30) as u8, (y * 30) as u8, 128]);
        }
    }
    let mut jpeg = Vec::new();
    JpegEncoder::new(&mut jpeg)
        .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
        .unwrap();
    jpeg
}

pub struct FakeMotion {
    start_error: Option<DeviceError>,
    accel: Mutex<Option<AccelSample>>,
    gyro: Mutex<Option<GyroSample>>,
}

impl FakeMotion {
    pub fn full() -> Self {
        Self {
            start_error: None,
            accel: Mutex::new(Some(AccelSample::new(0.01, -0.02, -0.98))),
            gyro: Mutex::new(Some(GyroSample::new(0.001, 0.002, -0.003))),
        }
    }

    pub fn empty() -> Self {
        Self {
            start_error: None,
            accel: Mutex::new(None),
            gyro: Mutex::new(None),
        }
    }

    pub fn failing(error: DeviceError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::empty()
        }
    }

    pub fn set_accel(&self, accel: Option<AccelSample>) {
        *self.accel.lock().unwrap() = accel;
    }

    pub fn set_gyro(&self, gyro: Option<GyroSample>) {
        *self.gyro.lock().unwrap() = gyro;
    }
}

impl MotionProvider for FakeMotion {
    fn start_updates(&self) -> Result<(), DeviceError> {
        match &self.start_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn latest_accelerometer(&self) -> Option<AccelSample> {
        *self.accel.lock().unwrap()
    }

    fn latest_gyro(&self) -> Option<GyroSample> {
        *self.gyro.lock().unwrap()
    }
}

/// Camera that parks every request until the test completes it
pub struct FakeCamera {
    open_error: Option<DeviceError>,
    pending: Mutex<VecDeque<CaptureCompletion>>,
    requests: AtomicUsize,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            open_error: None,
            pending: Mutex::new(VecDeque::new()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: DeviceError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Throw away the oldest outstanding completion without answering it,
    /// like a device that resets mid-capture
    pub fn drop_next(&self) -> bool {
        self.pending.lock().unwrap().pop_front().is_some()
    }

    /// Run the oldest outstanding completion. False if none is pending.
    pub fn complete_next(&self, result: Result<Vec<u8>, DeviceError>) -> bool {
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some(completion) => {
                completion(result);
                true
            }
            None => false,
        }
    }
}

impl CameraDevice for FakeCamera {
    fn open(&self) -> Result<(), DeviceError> {
        match &self.open_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn request_still_image(&self, completion: CaptureCompletion) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push_back(completion);
    }
}

/// Location provider driven by `emit`, applying the distance filter it
/// was started with
pub struct FakeLocation {
    start_error: Option<DeviceError>,
    filter: Mutex<Option<DistanceFilter>>,
    callback: Mutex<Option<FixCallback>>,
    running: AtomicBool,
    start_calls: AtomicUsize,
}

impl FakeLocation {
    pub fn new() -> Self {
        Self {
            start_error: None,
            filter: Mutex::new(None),
            callback: Mutex::new(None),
            running: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: DeviceError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::new()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Offer a raw fix. Returns whether it passed the filter and was delivered.
    pub fn emit(&self, fix: GpsSample) -> bool {
        if !self.is_running() {
            return false;
        }
        let accepted = match self.filter.lock().unwrap().as_mut() {
            Some(filter) => filter.accept(fix),
            None => false,
        };
        if accepted {
            if let Some(callback) = self.callback.lock().unwrap().as_ref() {
                callback(fix);
            }
        }
        accepted
    }
}

impl LocationProvider for FakeLocation {
    fn start_updates(&self, min_distance_m: f64, on_fix: FixCallback) -> Result<(), DeviceError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.start_error {
            return Err(e.clone());
        }
        *self.filter.lock().unwrap() = Some(DistanceFilter::new(min_distance_m));
        *self.callback.lock().unwrap() = Some(on_fix);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_updates(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.callback.lock().unwrap().take();
    }
}
