//! Hardware seams for the plate positioning stack.
//!
//! Every trait here is implemented twice: once over Raspberry Pi GPIO in
//! `plate_hardware` (behind its `hardware` feature) and once by the simulated
//! backend. Interrupt-style inputs take a sink closure; the sink is invoked from
//! the interrupt context and must never block.
pub mod clock;

pub use clock::{Clock, MonotonicClock, test_clock};

use std::path::{Path, PathBuf};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Closure invoked on every clock edge with the data bit sampled at that edge.
pub type BitSink = Box<dyn FnMut(bool) + Send>;

/// Closure invoked on every rising edge of a switch input.
pub type EdgeSink = Box<dyn FnMut() + Send>;

/// Step pulse output plus direction line of one stepper driver.
pub trait StepGenerator: Send {
    /// Begin emitting pulses at `hz` steps per second.
    fn start(&mut self, hz: f64) -> Result<(), BoxError>;
    /// Change the pulse frequency of a running pulse train.
    fn set_frequency(&mut self, hz: f64) -> Result<(), BoxError>;
    /// Halt pulse generation.
    fn stop(&mut self) -> Result<(), BoxError>;
    /// Set the pulse high-time as a fraction of the period, in `(0.0, 1.0]`.
    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), BoxError>;
    /// Drive the direction output; `true` selects the reversed direction.
    fn set_direction(&mut self, reversed: bool) -> Result<(), BoxError>;
}

/// Debounced digital input such as a limit switch or emergency stop.
pub trait SwitchInput: Send + Sync {
    /// Sample the current level; `true` when the switch is asserted.
    fn is_asserted(&self) -> bool;
    /// Register `sink` to be called on every rising edge.
    fn subscribe(&self, sink: EdgeSink) -> Result<(), BoxError>;
    /// Drop any registered sink.
    fn unsubscribe(&self) -> Result<(), BoxError>;
}

/// Caliper clock line; each edge carries the data bit sampled on it.
pub trait ClockLine: Send + Sync {
    fn subscribe(&self, sink: BitSink) -> Result<(), BoxError>;
    fn unsubscribe(&self) -> Result<(), BoxError>;
}

pub trait DigitalOutput: Send {
    fn set_high(&mut self) -> Result<(), BoxError>;
    fn set_low(&mut self) -> Result<(), BoxError>;
}

pub trait Camera: Send {
    /// Capture a still image and return the stored file path.
    fn take_photo(&mut self, name: Option<&str>) -> Result<PathBuf, BoxError>;
}

/// Operator-facing notifications. Fire-and-forget: implementations must not block.
pub trait StatusSink: Send + Sync {
    fn update_status(&self, text: &str);
    fn update_image(&self, path: &Path);
}

impl<T: StepGenerator + ?Sized> StepGenerator for Box<T> {
    fn start(&mut self, hz: f64) -> Result<(), BoxError> {
        (**self).start(hz)
    }
    fn set_frequency(&mut self, hz: f64) -> Result<(), BoxError> {
        (**self).set_frequency(hz)
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        (**self).stop()
    }
    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), BoxError> {
        (**self).set_duty_cycle(duty)
    }
    fn set_direction(&mut self, reversed: bool) -> Result<(), BoxError> {
        (**self).set_direction(reversed)
    }
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn set_high(&mut self) -> Result<(), BoxError> {
        (**self).set_high()
    }
    fn set_low(&mut self) -> Result<(), BoxError> {
        (**self).set_low()
    }
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn take_photo(&mut self, name: Option<&str>) -> Result<PathBuf, BoxError> {
        (**self).take_photo(name)
    }
}
