use std::sync::atomic::{AtomicU32, Ordering};

/// Settings of one mixer channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    /// Fader value, linear amplitude in `[0, 1]`.
    pub gain: f32,
    /// Pan position in `[-1, 1]`.
    pub pan: f32,
    pub solo: bool,
    pub mute: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            pan: 0.0,
            solo: false,
            mute: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixerState {
    channels: Vec<ChannelSettings>,
}

impl MixerState {
    /// Defaults for `stems` channels.
    pub fn new(stems: usize) -> Self {
        Self {
            channels: vec![ChannelSettings::default(); stems],
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, i: usize) -> Option<&ChannelSettings> {
        self.channels.get(i)
    }

    pub fn channels(&self) -> &[ChannelSettings] {
        &self.channels
    }

    pub fn set_gain(&mut self, i: usize, value: f32) -> bool {
        self.update(i, |c| c.gain = value.clamp(0.0, 1.0))
    }

    pub fn set_pan(&mut self, i: usize, value: f32) -> bool {
        self.update(i, |c| c.pan = value.clamp(-1.0, 1.0))
    }

    pub fn set_solo(&mut self, i: usize, solo: bool) -> bool {
        self.update(i, |c| c.solo = solo)
    }

    pub fn set_mute(&mut self, i: usize, mute: bool) -> bool {
        self.update(i, |c| c.mute = mute)
    }

    pub fn reset_all(&mut self) {
        for c in &mut self.channels {
            *c = ChannelSettings::default();
        }
    }

    pub fn any_solo(&self) -> bool {
        self.channels.iter().any(|c| c.solo)
    }

    /// Gain actually applied to stem `i` after solo and mute rules.
    pub fn effective_gain(&self, i: usize) -> f32 {
        let Some(c) = self.channels.get(i) else {
            return 0.0;
        };
        if c.mute || (self.any_solo() && !c.solo) {
            0.0
        } else {
            c.gain
        }
    }

    pub fn effective_gains(&self) -> Vec<f32> {
        (0..self.channels.len())
            .map(|i| self.effective_gain(i))
            .collect()
    }

    fn update(&mut self, i: usize, f: impl FnOnce(&mut ChannelSettings)) -> bool {
        match self.channels.get_mut(i) {
            Some(c) => {
                f(c);
                true
            }
            None => false,
        }
    }
}

/// `f32` stored as bits in an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed)
    }
}

/// Lock-free per-stem cells shared between the control side and the render
/// thread.
#[derive(Debug)]
pub struct StemControls {
    /// Written by control, read every render block.
    pub effective_gain: AtomicF32,
    /// Written by control, read every render block.
    pub pan: AtomicF32,
    /// Post-fader RMS of the most recent render block. Written by render.
    pub block_rms: AtomicF32,
    /// Peak-hold meter level. Written by the meter tick.
    pub meter: AtomicF32,
}

impl Default for StemControls {
    fn default() -> Self {
        Self {
            effective_gain: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
            block_rms: AtomicF32::new(0.0),
            meter: AtomicF32::new(0.0),
        }
    }
}
