//! Raspberry Pi GPIO backends (rppal).
//!
//! Step pulses come from rppal's PWM on the step pin, so the pulse train runs
//! without a thread of ours toggling pins. Switch and caliper clock interrupts
//! use rppal's asynchronous interrupt threads; sinks run on those threads.
use crate::error::{HwError, Result};
use plate_traits::{BitSink, BoxError, ClockLine, DigitalOutput, EdgeSink, StepGenerator, SwitchInput};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default duty cycle of the step pulse train.
const STEP_DUTY: f64 = 0.5;

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn open_input(pin: u8) -> Result<InputPin> {
    let gpio = Gpio::new().map_err(gpio_err)?;
    Ok(gpio.get(pin).map_err(gpio_err)?.into_input_pulldown())
}

fn open_output(pin: u8) -> Result<OutputPin> {
    let gpio = Gpio::new().map_err(gpio_err)?;
    let mut out = gpio.get(pin).map_err(gpio_err)?.into_output();
    out.set_low();
    Ok(out)
}

/// Stepper driver with STEP and DIR inputs.
pub struct GpioStepper {
    step: OutputPin,
    dir: OutputPin,
    hz: f64,
    duty: f64,
    running: bool,
}

impl GpioStepper {
    pub fn new(step_pin: u8, dir_pin: u8) -> Result<Self> {
        Ok(Self {
            step: open_output(step_pin)?,
            dir: open_output(dir_pin)?,
            hz: 0.0,
            duty: STEP_DUTY,
            running: false,
        })
    }
}

impl StepGenerator for GpioStepper {
    fn start(&mut self, hz: f64) -> std::result::Result<(), BoxError> {
        self.step.set_pwm_frequency(hz, self.duty).map_err(gpio_err)?;
        self.hz = hz;
        self.running = true;
        Ok(())
    }

    fn set_frequency(&mut self, hz: f64) -> std::result::Result<(), BoxError> {
        self.hz = hz;
        if self.running {
            self.step.set_pwm_frequency(hz, self.duty).map_err(gpio_err)?;
        }
        Ok(())
    }

    fn set_duty_cycle(&mut self, duty: f64) -> std::result::Result<(), BoxError> {
        self.duty = duty.clamp(0.0, 1.0);
        if self.running {
            self.step.set_pwm_frequency(self.hz, self.duty).map_err(gpio_err)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        self.running = false;
        self.step.clear_pwm().map_err(gpio_err)?;
        self.step.set_low();
        Ok(())
    }

    fn set_direction(&mut self, reversed: bool) -> std::result::Result<(), BoxError> {
        self.dir.write(if reversed { Level::High } else { Level::Low });
        Ok(())
    }
}

/// Limit switch or e-stop input. `active_low` inverts the asserted level.
pub struct GpioSwitch {
    pin: Mutex<InputPin>,
    active_low: bool,
}

impl GpioSwitch {
    pub fn new(pin: u8, active_low: bool) -> Result<Self> {
        Ok(Self {
            pin: Mutex::new(open_input(pin)?),
            active_low,
        })
    }
}

impl SwitchInput for GpioSwitch {
    fn is_asserted(&self) -> bool {
        lock(&self.pin).is_high() != self.active_low
    }

    fn subscribe(&self, mut sink: EdgeSink) -> std::result::Result<(), BoxError> {
        let trigger = if self.active_low {
            Trigger::FallingEdge
        } else {
            Trigger::RisingEdge
        };
        lock(&self.pin)
            .set_async_interrupt(trigger, move |_level: Level| sink())
            .map_err(gpio_err)?;
        Ok(())
    }

    fn unsubscribe(&self) -> std::result::Result<(), BoxError> {
        lock(&self.pin).clear_async_interrupt().map_err(gpio_err)?;
        Ok(())
    }
}

/// Caliper clock and data lines. The data line is sampled on every falling clock edge.
pub struct GpioClockLine {
    clock: Mutex<InputPin>,
    data: Arc<Mutex<InputPin>>,
}

impl GpioClockLine {
    pub fn new(clock_pin: u8, data_pin: u8) -> Result<Self> {
        Ok(Self {
            clock: Mutex::new(open_input(clock_pin)?),
            data: Arc::new(Mutex::new(open_input(data_pin)?)),
        })
    }
}

impl ClockLine for GpioClockLine {
    fn subscribe(&self, mut sink: BitSink) -> std::result::Result<(), BoxError> {
        let data = self.data.clone();
        lock(&self.clock)
            .set_async_interrupt(Trigger::FallingEdge, move |_level: Level| {
                let bit = lock(&data).is_high();
                sink(bit);
            })
            .map_err(gpio_err)?;
        Ok(())
    }

    fn unsubscribe(&self) -> std::result::Result<(), BoxError> {
        lock(&self.clock).clear_async_interrupt().map_err(gpio_err)?;
        Ok(())
    }
}

pub struct GpioOutput {
    pin: OutputPin,
}

impl GpioOutput {
    pub fn new(pin: u8) -> Result<Self> {
        Ok(Self {
            pin: open_output(pin)?,
        })
    }
}

impl DigitalOutput for GpioOutput {
    fn set_high(&mut self) -> std::result::Result<(), BoxError> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> std::result::Result<(), BoxError> {
        self.pin.set_low();
        Ok(())
    }
}
