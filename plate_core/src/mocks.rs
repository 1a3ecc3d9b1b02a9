//! Test and helper mocks for plate_core

use plate_traits::{BoxError, Camera, StatusSink, StepGenerator};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::util::lock;

/// Status sink that keeps every notification for later inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingStatus {
    texts: Arc<Mutex<Vec<String>>>,
    images: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        lock(&self.texts).clone()
    }

    pub fn images(&self) -> Vec<PathBuf> {
        lock(&self.images).clone()
    }
}

impl StatusSink for RecordingStatus {
    fn update_status(&self, text: &str) {
        lock(&self.texts).push(text.to_string());
    }

    fn update_image(&self, path: &Path) {
        lock(&self.images).push(path.to_path_buf());
    }
}

/// A pulse output whose every operation fails; for error mapping paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStepGenerator;

impl StepGenerator for FailingStepGenerator {
    fn start(&mut self, _hz: f64) -> Result<(), BoxError> {
        Err(Box::new(std::io::Error::other("pwm channel unavailable")))
    }
    fn set_frequency(&mut self, _hz: f64) -> Result<(), BoxError> {
        Err(Box::new(std::io::Error::other("pwm channel unavailable")))
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
    fn set_duty_cycle(&mut self, _duty: f64) -> Result<(), BoxError> {
        Err(Box::new(std::io::Error::other("pwm channel unavailable")))
    }
    fn set_direction(&mut self, _reversed: bool) -> Result<(), BoxError> {
        Err(Box::new(std::io::Error::other("direction pin unavailable")))
    }
}

/// Camera that fails on the n-th capture (1-based), succeeding otherwise.
#[derive(Debug, Clone)]
pub struct FlakyCamera {
    fail_on: u32,
    taken: u32,
}

impl FlakyCamera {
    pub fn new(fail_on: u32) -> Self {
        Self { fail_on, taken: 0 }
    }
}

impl Camera for FlakyCamera {
    fn take_photo(&mut self, name: Option<&str>) -> Result<PathBuf, BoxError> {
        self.taken += 1;
        if self.taken == self.fail_on {
            return Err(Box::new(std::io::Error::other("camera disconnected")));
        }
        Ok(PathBuf::from(format!("{}.jpg", name.unwrap_or("photo"))))
    }
}
