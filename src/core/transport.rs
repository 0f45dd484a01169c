//! Transport: the single source of truth for play/pause/stop/seek and the
//! loop region.
//!
//! While playing, the logical playhead is `clock.now() - t0`. Pausing or
//! stopping freezes it into `resting`. The graph plays the scheduled segment
//! and wraps sample-accurately on its own; [`TransportController::tick`]
//! applies the same wrap to the wall-clock playhead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::graph::Segment;
use crate::types::LoopRegion;

/// Monotonic time source in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for deterministic tests and offline drivers.
#[derive(Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, t: f64) {
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, dt: f64) {
        self.set(self.now() + dt);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Where the transport sends scheduled playback.
pub trait Scheduler: Send {
    fn schedule(&self, segment: Segment);
    fn halt(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Read-only snapshot for observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    pub state: PlaybackState,
    pub position: f64,
    pub loop_enabled: bool,
    pub region: Option<LoopRegion>,
    pub duration: f64,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }
}

pub struct TransportController {
    clock: Arc<dyn Clock>,
    scheduler: Box<dyn Scheduler>,
    state: PlaybackState,
    /// Playhead while not playing.
    resting: f64,
    /// Clock reference while playing.
    t0: f64,
    duration: f64,
    region: Option<LoopRegion>,
    loop_enabled: bool,
}

impl TransportController {
    pub fn new(clock: Arc<dyn Clock>, scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            clock,
            scheduler,
            state: PlaybackState::Stopped,
            resting: 0.0,
            t0: 0.0,
            duration: 0.0,
            region: None,
            loop_enabled: false,
        }
    }

    /// Reset for a freshly installed stem set of `duration` seconds.
    pub fn reset(&mut self, duration: f64) {
        self.scheduler.halt();
        self.state = PlaybackState::Stopped;
        self.duration = duration.max(0.0);
        self.region = None;
        self.resting = 0.0;
    }

    pub fn play(&mut self) {
        if self.state == PlaybackState::Playing || self.duration <= 0.0 {
            return;
        }
        let mut pos = self.resting;
        match self.region {
            Some(r) if !r.contains(pos) => pos = r.start,
            None if pos >= self.duration => pos = 0.0,
            _ => {}
        }
        self.start_at(pos);
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.resting = self.position();
        self.scheduler.halt();
        self.state = PlaybackState::Paused;
    }

    pub fn stop(&mut self) {
        self.scheduler.halt();
        self.state = PlaybackState::Stopped;
        self.resting = self.region.map(|r| r.start).unwrap_or(0.0);
    }

    /// Move the playhead to `t` (clamped to the file). While playing with an
    /// active region, a target outside the region lands on the region start.
    pub fn seek(&mut self, t: f64) {
        let mut t = if t.is_finite() {
            t.clamp(0.0, self.duration)
        } else {
            0.0
        };
        if self.state == PlaybackState::Playing {
            if let Some(r) = self.region {
                if !r.contains(t) {
                    t = r.start;
                }
            }
            self.start_at(t);
        } else {
            self.resting = t;
        }
    }

    /// Set or clear the loop region. Regions are clamped to the file and
    /// inactive regions (`end <= start`) clear it.
    pub fn set_region(&mut self, region: Option<LoopRegion>) {
        self.region = region.and_then(|r| r.clamped(self.duration));
        if self.state == PlaybackState::Playing {
            let mut pos = self.position_unwrapped();
            if let Some(r) = self.region {
                if !r.contains(pos) {
                    pos = r.start;
                }
            } else if pos >= self.duration {
                pos = 0.0;
            }
            self.start_at(pos);
        }
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        if self.loop_enabled == enabled {
            return;
        }
        self.loop_enabled = enabled;
        if self.state == PlaybackState::Playing && self.region.is_none() {
            let pos = self.position();
            self.start_at(pos);
        }
    }

    /// Sample the clock. Applies the loop wrap to the clock reference, or
    /// moves to `Stopped` when the played range is exhausted.
    pub fn tick(&mut self) -> TransportState {
        if self.state == PlaybackState::Playing {
            let now = self.clock.now();
            let raw = now - self.t0;
            let (range_start, range_end, looping) = self.range();
            if raw >= range_end {
                if looping && range_end > range_start {
                    let wrapped = wrap(raw, range_start, range_end);
                    self.t0 = now - wrapped;
                } else {
                    self.scheduler.halt();
                    self.state = PlaybackState::Stopped;
                    self.resting = self.region.map(|r| r.start).unwrap_or(0.0);
                }
            }
        }
        self.snapshot()
    }

    /// Logical playhead in seconds.
    pub fn position(&self) -> f64 {
        if self.state != PlaybackState::Playing {
            return self.resting;
        }
        let raw = self.position_unwrapped();
        let (start, end, looping) = self.range();
        if raw < end {
            raw
        } else if looping && end > start {
            wrap(raw, start, end)
        } else {
            end
        }
    }

    pub fn snapshot(&self) -> TransportState {
        TransportState {
            state: self.state,
            position: self.position(),
            loop_enabled: self.loop_enabled,
            region: self.region,
            duration: self.duration,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn region(&self) -> Option<LoopRegion> {
        self.region
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn position_unwrapped(&self) -> f64 {
        self.clock.now() - self.t0
    }

    /// Played range and whether it repeats. A region always loops.
    fn range(&self) -> (f64, f64, bool) {
        match self.region {
            Some(r) => (r.start, r.end, true),
            None => (0.0, self.duration, self.loop_enabled),
        }
    }

    fn start_at(&mut self, pos: f64) {
        let (start, end, looping) = self.range();
        self.t0 = self.clock.now() - pos;
        self.scheduler.schedule(Segment {
            start: pos,
            end,
            loop_from: looping.then_some(start),
        });
        self.state = PlaybackState::Playing;
    }
}

fn wrap(t: f64, start: f64, end: f64) -> f64 {
    let len = end - start;
    let wrapped = start + (t - start).rem_euclid(len);
    // Guard against rounding landing exactly on `end`.
    if wrapped >= end {
        start
    } else {
        wrapped
    }
}
