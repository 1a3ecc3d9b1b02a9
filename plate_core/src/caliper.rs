//! Caliper position feedback: interrupt-side decoding plus the reading handoff.
//!
//! The clock line sink runs in interrupt context. It decodes the frame,
//! filters it and hands the result over a capacity-1 channel without ever
//! blocking: when the slot is still occupied the older reading is discarded.
//! Every reading is tagged with the listen generation it was produced in, so
//! nothing queued before `stop_listening` can reach a later move.
use crate::config::{CaliperCfg, FilterCfg};
use crate::decoder::FrameDecoder;
use crate::filter::OutlierFilter;
use crate::hw_error::report;
use crate::util::{SharedClock, lock};
use crossbeam_channel::{self as xch, TrySendError};
use plate_traits::{ClockLine, DigitalOutput};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One decoded frame after outlier filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Accepted(f64),
    /// Decoded fine but too far from recent readings.
    Rejected(f64),
}

impl Reading {
    /// Position in millimetres if the reading was accepted.
    #[must_use]
    pub const fn accepted(self) -> Option<f64> {
        match self {
            Self::Accepted(mm) => Some(mm),
            Self::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tagged {
    generation: u64,
    reading: Reading,
}

struct Pipeline {
    decoder: FrameDecoder,
    filter: OutlierFilter,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaliperStats {
    pub frames: u64,
    pub partial_frames: u64,
    pub rejected: u64,
    /// Readings overwritten or dropped before the consumer took them.
    pub dropped: u64,
}

pub struct Caliper {
    name: String,
    line: Box<dyn ClockLine>,
    zero_out: Mutex<Box<dyn DigitalOutput>>,
    pipeline: Arc<Mutex<Pipeline>>,
    tx: xch::Sender<Tagged>,
    rx: xch::Receiver<Tagged>,
    generation: Arc<AtomicU64>,
    listening: AtomicBool,
    dropped: Arc<AtomicU64>,
    zero_pulse: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for Caliper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caliper")
            .field("name", &self.name)
            .field("listening", &self.is_listening())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Caliper {
    pub fn new(
        name: impl Into<String>,
        line: Box<dyn ClockLine>,
        zero_out: Box<dyn DigitalOutput>,
        cfg: &CaliperCfg,
        filter: &FilterCfg,
        clock: SharedClock,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        Self {
            name: name.into(),
            line,
            zero_out: Mutex::new(zero_out),
            pipeline: Arc::new(Mutex::new(Pipeline {
                decoder: FrameDecoder::new(&cfg.decoder),
                filter: OutlierFilter::new(filter),
            })),
            tx,
            rx,
            generation: Arc::new(AtomicU64::new(0)),
            listening: AtomicBool::new(false),
            dropped: Arc::new(AtomicU64::new(0)),
            zero_pulse: cfg.zero_pulse,
            clock,
        }
    }

    /// Enable edge sampling. Idempotent.
    pub fn start_listening(&self) -> crate::Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.pipeline).decoder.reset();

        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.tx.clone();
        let rx = self.rx.clone();
        let dropped = Arc::clone(&self.dropped);
        let clock = Arc::clone(&self.clock);
        let sink = move |bit: bool| {
            let now = clock.now();
            let reading = {
                let mut p = lock(&pipeline);
                let Some(mm) = p.decoder.on_clock_edge(bit, now) else {
                    return;
                };
                match p.filter.filter(mm) {
                    Some(mm) => Reading::Accepted(mm),
                    None => Reading::Rejected(mm),
                }
            };
            handoff(&tx, &rx, &dropped, Tagged { generation, reading });
        };

        if let Err(e) = self.line.subscribe(Box::new(sink)) {
            self.listening.store(false, Ordering::SeqCst);
            return Err(report(&self.name, &e));
        }
        tracing::debug!(caliper = %self.name, generation, "listening");
        Ok(())
    }

    /// Disable edge sampling and purge any queued reading. Idempotent.
    pub fn stop_listening(&self) -> crate::Result<()> {
        let was = self.listening.swap(false, Ordering::SeqCst);
        // invalidate in-flight readings before draining
        self.generation.fetch_add(1, Ordering::SeqCst);
        let result = if was {
            self.line.unsubscribe().map_err(|e| report(&self.name, &e))
        } else {
            Ok(())
        };
        while self.rx.try_recv().is_ok() {}
        result
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the next reading of the current listen
    /// generation. `None` on timeout.
    pub fn get_reading(&self, timeout: Duration) -> Option<Reading> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(t) if t.generation == self.generation.load(Ordering::SeqCst) => {
                    return Some(t.reading);
                }
                Ok(t) => {
                    tracing::trace!(caliper = %self.name, stale = t.generation, "dropping stale reading");
                }
                Err(_) => return None,
            }
        }
    }

    /// Reinitialise the outlier window, before a new move.
    pub fn reset_filter(&self) {
        lock(&self.pipeline).filter.reset();
    }

    /// Pulse the zero output so the caliper takes its current position as origin.
    pub fn zero(&self) -> crate::Result<()> {
        let mut out = lock(&self.zero_out);
        out.set_high().map_err(|e| report(&self.name, &e))?;
        self.clock.sleep(self.zero_pulse);
        out.set_low().map_err(|e| report(&self.name, &e))?;
        tracing::info!(caliper = %self.name, "caliper zeroed");
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> CaliperStats {
        let p = lock(&self.pipeline);
        CaliperStats {
            frames: p.decoder.frames(),
            partial_frames: p.decoder.discarded(),
            rejected: p.filter.rejected(),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Caliper {
    fn drop(&mut self) {
        if let Err(e) = self.stop_listening() {
            tracing::warn!(caliper = %self.name, error = %e, "caliper unsubscribe on drop failed");
        }
    }
}

/// Non-blocking send that keeps the newest reading.
fn handoff(tx: &xch::Sender<Tagged>, rx: &xch::Receiver<Tagged>, dropped: &AtomicU64, t: Tagged) {
    match tx.try_send(t) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(t)) => {
            if rx.try_recv().is_ok() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            if tx.try_send(t).is_err() {
                // lost the race against another producer; newest is dropped
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
