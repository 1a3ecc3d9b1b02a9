//! Caliper frame assembly and decoding.
//!
//! The caliper clocks out one 24-bit frame every 100-150 ms. Bits are sampled
//! on each clock edge; a long gap between edges marks a frame boundary. After
//! reversing the arrival order, bits 0..3 are unused, bit 3 is the sign and
//! bits 4..24 hold the magnitude in hundredths of a millimetre.
use crate::config::DecoderCfg;
use std::time::{Duration, Instant};

pub const FRAME_BITS: usize = 24;
const SIGN_BIT: usize = 3;
const MAGNITUDE_START: usize = 4;

/// Decode one complete frame given in arrival order. Returns millimetres.
#[must_use]
pub fn decode_frame(bits: &[bool; FRAME_BITS]) -> f64 {
    let mut frame = *bits;
    frame.reverse();
    let magnitude = frame[MAGNITUDE_START..]
        .iter()
        .fold(0u32, |acc, &b| (acc << 1) | u32::from(b));
    let mm = f64::from(magnitude) / 100.0;
    if frame[SIGN_BIT] { -mm } else { mm }
}

/// Incremental frame builder fed from the clock interrupt.
#[derive(Debug)]
pub struct FrameDecoder {
    bits: Vec<bool>,
    last_edge: Option<Instant>,
    bounce: Duration,
    pause: Duration,
    frames: u64,
    discarded: u64,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(cfg: &DecoderCfg) -> Self {
        Self {
            bits: Vec::with_capacity(FRAME_BITS),
            last_edge: None,
            bounce: cfg.clock_bounce,
            pause: cfg.pause,
            frames: 0,
            discarded: 0,
        }
    }

    /// Consume the bit sampled at one clock edge.
    ///
    /// Returns the decoded reading when this edge completes a frame.
    pub fn on_clock_edge(&mut self, bit: bool, now: Instant) -> Option<f64> {
        if let Some(last) = self.last_edge {
            let gap = now.saturating_duration_since(last);
            if gap < self.bounce {
                return None;
            }
            if gap >= self.pause {
                self.discard_partial();
            }
        }
        self.last_edge = Some(now);
        self.bits.push(bit);
        if self.bits.len() < FRAME_BITS {
            return None;
        }

        let mut frame = [false; FRAME_BITS];
        frame.copy_from_slice(&self.bits);
        self.bits.clear();
        self.frames += 1;
        Some(decode_frame(&frame))
    }

    /// Forget any partial frame and the edge history.
    pub fn reset(&mut self) {
        self.discard_partial();
        self.last_edge = None;
    }

    fn discard_partial(&mut self) {
        if !self.bits.is_empty() {
            tracing::trace!(bits = self.bits.len(), "discarding partial caliper frame");
            self.discarded += 1;
            self.bits.clear();
        }
    }

    /// Bits collected for the frame in progress.
    #[must_use]
    pub fn pending_bits(&self) -> usize {
        self.bits.len()
    }

    /// Complete frames decoded so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Partial frames thrown away at a frame gap or reset.
    #[must_use]
    pub const fn discarded(&self) -> u64 {
        self.discarded
    }
}
