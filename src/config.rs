/// Session configuration, fixed for one editing/playback session
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sequencer::pitch::{parse_pitch_label, pitch_label_for};
use crate::sequencer::schedule::EventOrder;

pub const DEFAULT_STEP_COUNT: usize = 16;
pub const DEFAULT_VELOCITY: u8 = 65;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

const MIN_BPM: f32 = 40.0;
const MAX_BPM: f32 = 240.0;
const STEPS_PER_BEAT: f32 = 4.0; // 16th notes

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub step_count: usize,
    /// Pitch labels, one per grid row. Row 0 is the first entry.
    pub tone_list: Vec<String>,
    pub playback_interval: Duration,
    pub event_order: EventOrder,
    pub velocity: u8,
    /// Preferred MIDI output port; falls back to the first port.
    pub midi_port: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_count: DEFAULT_STEP_COUNT,
            // do3 .. do4, one chromatic octave
            tone_list: chromatic_range(48, 60),
            playback_interval: DEFAULT_INTERVAL,
            event_order: EventOrder::default(),
            velocity: DEFAULT_VELOCITY,
            midi_port: None,
        }
    }
}

impl SessionConfig {
    /// Default session with a chromatic tone list from `from` up to `to`, inclusive.
    pub fn chromatic(from: &str, to: &str) -> Result<Self> {
        let low = parse_pitch_label(from)?;
        let high = parse_pitch_label(to)?;
        if low > high {
            return Err(Error::InvalidConfig(format!(
                "tone range {} .. {} is descending",
                from, to
            )));
        }

        Ok(Self {
            tone_list: chromatic_range(low, high),
            ..Self::default()
        })
    }

    pub fn with_step_count(mut self, step_count: usize) -> Self {
        self.step_count = step_count;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.playback_interval = interval;
        self
    }

    /// One step per 16th note at `bpm`, clamped to 40..=240.
    pub fn with_bpm(mut self, bpm: f32) -> Self {
        self.playback_interval = interval_for_bpm(bpm);
        self
    }

    pub fn with_event_order(mut self, order: EventOrder) -> Self {
        self.event_order = order;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_count == 0 {
            return Err(Error::InvalidConfig("step count must be positive".into()));
        }
        if self.tone_list.is_empty() {
            return Err(Error::InvalidConfig("tone list is empty".into()));
        }
        if self.playback_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "playback interval must be positive".into(),
            ));
        }
        if self.velocity > 127 {
            return Err(Error::InvalidConfig(format!(
                "velocity {} is out of MIDI range",
                self.velocity
            )));
        }
        for label in &self.tone_list {
            parse_pitch_label(label)?;
        }
        Ok(())
    }
}

pub fn interval_for_bpm(bpm: f32) -> Duration {
    let bpm = if bpm.is_finite() { bpm } else { MIN_BPM };
    let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    Duration::from_secs_f32(60.0 / bpm / STEPS_PER_BEAT)
}

pub fn bpm_for_interval(interval: Duration) -> f32 {
    60.0 / (interval.as_secs_f32() * STEPS_PER_BEAT)
}

fn chromatic_range(low: u8, high: u8) -> Vec<String> {
    (low..=high).filter_map(pitch_label_for).collect()
}
