//! Playback graph
//!
//! ```text
//!  stem 0 ─► gain ─► pan ─► meter ─┐
//!  stem 1 ─► gain ─► pan ─► meter ─┼─► sum ─► master stage ─► device
//!  stem n ─► gain ─► pan ─► meter ─┘
//! ```
//!
//! The graph is split in two halves:
//! - [`PlaybackGraph`] lives on the control thread. It owns the mixer model,
//!   builds voices on load and publishes scalar changes through atomics.
//! - [`GraphRenderer`] lives on the audio thread. It receives voices and
//!   schedules over a wait-free `rtrb` queue and never locks or allocates.
//!   Retired voices travel back on a second queue so the audio thread never
//!   frees memory either.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rtrb::{Consumer, Producer, RingBuffer};

use super::dsp::{pan_gains, resample, seconds_to_frame, to_planar_stereo};
use super::mixer::{AtomicF32, MixerState, StemControls};
use super::transport::Scheduler;
use crate::{
    error::Result,
    stem::{StemKind, StemSet},
};

/// Peak-hold decay applied on every meter tick.
pub const METER_DECAY: f32 = 0.85;
/// Scale from block RMS to meter level.
pub const METER_HEADROOM: f32 = 2.5;

const COMMAND_QUEUE_CAPACITY: usize = 64;
const GARBAGE_QUEUE_CAPACITY: usize = 8;

/// A range of the stem set to play, in seconds. When the range is exhausted
/// playback continues at `loop_from` if set and stops otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub loop_from: Option<f64>,
}

struct StemVoice {
    frames: Vec<[f32; 2]>,
    controls: Arc<StemControls>,
    cursor: usize,
    end: usize,
    loop_from: Option<usize>,
    active: bool,
}

struct Voices {
    list: Vec<StemVoice>,
    duration: f64,
}

impl Voices {
    fn empty() -> Box<Self> {
        Box::new(Voices {
            list: Vec::new(),
            duration: 0.0,
        })
    }
}

enum GraphCommand {
    Load(Box<Voices>),
    Schedule(Segment),
    Halt,
}

struct GraphShared {
    playing: AtomicBool,
    /// Set when a non-looping segment ran out.
    finished: AtomicBool,
    /// Render cursor of the first stem, in output frames.
    position: AtomicU64,
    master_gain: AtomicF32,
}

/// Control-side half of the playback graph.
pub struct PlaybackGraph {
    commands: Arc<Mutex<Producer<GraphCommand>>>,
    garbage: Consumer<Box<Voices>>,
    shared: Arc<GraphShared>,
    controls: Vec<Arc<StemControls>>,
    mixer: MixerState,
    kinds: Vec<StemKind>,
    duration: f64,
    output_rate: u32,
}

/// Audio-thread half of the playback graph.
pub struct GraphRenderer {
    commands: Consumer<GraphCommand>,
    garbage: Producer<Box<Voices>>,
    voices: Box<Voices>,
    shared: Arc<GraphShared>,
    playing: bool,
}

/// Cloneable handle the transport uses to start and stop scheduled playback.
#[derive(Clone)]
pub struct GraphScheduler {
    commands: Arc<Mutex<Producer<GraphCommand>>>,
}

impl PlaybackGraph {
    /// Create both halves of a graph rendering at `output_rate`.
    pub fn new(output_rate: u32) -> (PlaybackGraph, GraphRenderer) {
        let (cmd_tx, cmd_rx) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let (garbage_tx, garbage_rx) = RingBuffer::new(GARBAGE_QUEUE_CAPACITY);
        let shared = Arc::new(GraphShared {
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            position: AtomicU64::new(0),
            master_gain: AtomicF32::new(1.0),
        });

        let graph = PlaybackGraph {
            commands: Arc::new(Mutex::new(cmd_tx)),
            garbage: garbage_rx,
            shared: shared.clone(),
            controls: Vec::new(),
            mixer: MixerState::default(),
            kinds: Vec::new(),
            duration: 0.0,
            output_rate,
        };
        let renderer = GraphRenderer {
            commands: cmd_rx,
            garbage: garbage_tx,
            voices: Voices::empty(),
            shared,
            playing: false,
        };
        (graph, renderer)
    }

    /// Replace every stem voice with `stems` and reset the mixer to defaults.
    /// Playback is halted until the transport schedules again.
    pub fn load(&mut self, stems: &StemSet) -> Result<()> {
        self.collect_garbage();

        let mut list = Vec::with_capacity(stems.len());
        let mut controls = Vec::with_capacity(stems.len());
        for stem in stems.stems() {
            let audio = resample(&stem.audio, self.output_rate)?;
            let c = Arc::new(StemControls::default());
            list.push(StemVoice {
                frames: to_planar_stereo(&audio.samples, audio.channels),
                controls: c.clone(),
                cursor: 0,
                end: 0,
                loop_from: None,
                active: false,
            });
            controls.push(c);
        }

        self.controls = controls;
        self.kinds = stems.kinds();
        self.duration = stems.duration();
        self.mixer = MixerState::new(stems.len());
        self.publish();

        self.push(GraphCommand::Load(Box::new(Voices {
            list,
            duration: self.duration,
        })));
        log::info!(
            "playback graph loaded {} stems ({:.2}s at {} Hz)",
            stems.len(),
            self.duration,
            self.output_rate
        );
        Ok(())
    }

    pub fn set_gain(&mut self, i: usize, value: f32) {
        if self.mixer.set_gain(i, value) {
            self.publish();
        } else {
            log::debug!("set_gain: no stem at index {i}");
        }
    }

    pub fn set_pan(&mut self, i: usize, value: f32) {
        if self.mixer.set_pan(i, value) {
            self.publish();
        } else {
            log::debug!("set_pan: no stem at index {i}");
        }
    }

    pub fn set_solo(&mut self, i: usize, solo: bool) {
        if self.mixer.set_solo(i, solo) {
            self.publish();
        } else {
            log::debug!("set_solo: no stem at index {i}");
        }
    }

    pub fn set_mute(&mut self, i: usize, mute: bool) {
        if self.mixer.set_mute(i, mute) {
            self.publish();
        } else {
            log::debug!("set_mute: no stem at index {i}");
        }
    }

    pub fn reset_all(&mut self) {
        self.mixer.reset_all();
        self.publish();
    }

    /// Master stage output gain (linear).
    pub fn set_master_gain(&self, gain: f32) {
        self.shared.master_gain.store(gain.max(0.0));
    }

    pub fn mixer(&self) -> &MixerState {
        &self.mixer
    }

    pub fn kinds(&self) -> &[StemKind] {
        &self.kinds
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Current meter level of stem `i`, in `[0, 1]`.
    pub fn meter_level(&self, i: usize) -> f32 {
        self.controls.get(i).map(|c| c.meter.load()).unwrap_or(0.0)
    }

    pub fn meter_levels(&self) -> Vec<f32> {
        self.controls.iter().map(|c| c.meter.load()).collect()
    }

    /// One metering tick: exponential peak hold over the latest block RMS.
    /// Runs independently of the transport so meters fall after a stop.
    pub fn tick_meters(&mut self) {
        for c in &self.controls {
            let level = (c.block_rms.load() * METER_HEADROOM).min(1.0);
            let held = c.meter.load() * METER_DECAY;
            c.meter.store(level.max(held));
        }
        self.collect_garbage();
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.playing.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> bool {
        self.shared.finished.load(Ordering::Relaxed)
    }

    /// Position of the render cursor in seconds.
    pub fn rendered_position(&self) -> f64 {
        if self.output_rate == 0 {
            return 0.0;
        }
        self.shared.position.load(Ordering::Relaxed) as f64 / self.output_rate as f64
    }

    pub fn scheduler(&self) -> GraphScheduler {
        GraphScheduler {
            commands: self.commands.clone(),
        }
    }

    fn publish(&self) {
        for (i, c) in self.controls.iter().enumerate() {
            c.effective_gain.store(self.mixer.effective_gain(i));
            c.pan.store(self.mixer.channel(i).map(|s| s.pan).unwrap_or(0.0));
        }
    }

    fn push(&self, cmd: GraphCommand) {
        push_command(&self.commands, cmd);
    }

    fn collect_garbage(&mut self) {
        while let Ok(old) = self.garbage.pop() {
            drop(old);
        }
    }
}

fn push_command(commands: &Mutex<Producer<GraphCommand>>, cmd: GraphCommand) {
    let mut tx = match commands.lock() {
        Ok(tx) => tx,
        Err(poisoned) => poisoned.into_inner(),
    };
    if tx.push(cmd).is_err() {
        log::warn!("playback command queue full, command dropped");
    }
}

impl Scheduler for GraphScheduler {
    fn schedule(&self, segment: Segment) {
        push_command(&self.commands, GraphCommand::Schedule(segment));
    }

    fn halt(&self) {
        push_command(&self.commands, GraphCommand::Halt);
    }
}

impl GraphRenderer {
    /// Fill `out` (interleaved, `channels` wide) with the next block.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();
        out.fill(0.0);
        if channels == 0 {
            return;
        }
        let frames = out.len() / channels;
        let playing = self.playing;
        let mut any_active = false;

        for voice in self.voices.list.iter_mut() {
            if !playing || !voice.active {
                voice.controls.block_rms.store(0.0);
                continue;
            }
            let gain = voice.controls.effective_gain.load();
            let (pan_l, pan_r) = pan_gains(voice.controls.pan.load());
            let mut sum_sq = 0.0f32;
            let mut count = 0usize;

            for f in 0..frames {
                if voice.cursor >= voice.end {
                    match voice.loop_from {
                        Some(from) if from < voice.end => voice.cursor = from,
                        _ => {
                            voice.active = false;
                            break;
                        }
                    }
                }
                let [l, r] = voice.frames[voice.cursor];
                let l = l * gain * pan_l;
                let r = r * gain * pan_r;
                sum_sq += l * l + r * r;
                count += 2;
                if channels == 1 {
                    out[f] += 0.5 * (l + r);
                } else {
                    out[f * channels] += l;
                    out[f * channels + 1] += r;
                }
                voice.cursor += 1;
            }

            let rms = if count > 0 {
                (sum_sq / count as f32).sqrt()
            } else {
                0.0
            };
            voice.controls.block_rms.store(rms);
            any_active |= voice.active;
        }

        let master = self.shared.master_gain.load();
        if master != 1.0 {
            for s in out.iter_mut() {
                *s *= master;
            }
        }

        if playing {
            if let Some(first) = self.voices.list.first() {
                self.shared
                    .position
                    .store(first.cursor as u64, Ordering::Relaxed);
            }
            if !any_active {
                self.playing = false;
                self.shared.playing.store(false, Ordering::Relaxed);
                self.shared.finished.store(true, Ordering::Relaxed);
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                GraphCommand::Load(voices) => {
                    let old = std::mem::replace(&mut self.voices, voices);
                    // Full queue means the control side stopped collecting;
                    // dropping here is the only option left.
                    let _ = self.garbage.push(old);
                    self.playing = false;
                    self.shared.playing.store(false, Ordering::Relaxed);
                    self.shared.position.store(0, Ordering::Relaxed);
                }
                GraphCommand::Schedule(segment) => {
                    let duration = self.voices.duration;
                    for v in self.voices.list.iter_mut() {
                        let total = v.frames.len();
                        v.cursor = seconds_to_frame(segment.start, duration, total);
                        v.end = seconds_to_frame(segment.end, duration, total);
                        v.loop_from = segment
                            .loop_from
                            .map(|s| seconds_to_frame(s, duration, total));
                        v.active = v.cursor < v.end;
                    }
                    self.playing = true;
                    self.shared.playing.store(true, Ordering::Relaxed);
                    self.shared.finished.store(false, Ordering::Relaxed);
                }
                GraphCommand::Halt => {
                    self.playing = false;
                    self.shared.playing.store(false, Ordering::Relaxed);
                }
            }
        }
    }
}
