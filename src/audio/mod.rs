/// Audio preview using cpal - a single sine voice that follows note events
///
/// The cpal stream stays on the thread that built it (`AudioPreview`);
/// the clock thread only touches the shared voice through `ToneSink`.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::sequencer::schedule::NoteEvent;
use crate::sequencer::EventSink;

const AMPLITUDE: f32 = 0.2;

#[derive(Debug, Default)]
struct Voice {
    note: Option<u8>,
    phase: f32,
}

impl Voice {
    fn apply(&mut self, event: &NoteEvent) {
        match *event {
            NoteEvent::NoteOn { note, .. } => self.note = Some(note),
            NoteEvent::NoteOff { note } => {
                if self.note == Some(note) {
                    self.note = None;
                }
            }
        }
    }

    fn next_sample(&mut self, sample_rate: f32) -> f32 {
        match self.note {
            Some(note) => {
                let sample = (self.phase * 2.0 * std::f32::consts::PI).sin() * AMPLITUDE;
                self.phase += midi_note_to_frequency(note) / sample_rate;
                if self.phase >= 1.0 {
                    self.phase -= 1.0;
                }
                sample
            }
            None => {
                self.phase = 0.0;
                0.0
            }
        }
    }
}

/// Owns the output stream. Keep it alive for as long as sound is wanted.
pub struct AudioPreview {
    _stream: Option<cpal::Stream>,
    voice: Arc<Mutex<Voice>>,
    live: Arc<AtomicBool>,
}

impl AudioPreview {
    /// Opens the default output device. Without one the preview is silent
    /// and its sink refuses to open.
    pub fn new() -> Self {
        let voice = Arc::new(Mutex::new(Voice::default()));
        let stream = match Self::setup_audio_stream(Arc::clone(&voice)) {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!("audio preview disabled: {}", err);
                None
            }
        };

        Self {
            live: Arc::new(AtomicBool::new(stream.is_some())),
            _stream: stream,
            voice,
        }
    }

    pub fn is_available(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn sink(&self) -> ToneSink {
        ToneSink {
            voice: Arc::clone(&self.voice),
            live: Arc::clone(&self.live),
            open: false,
        }
    }

    fn setup_audio_stream(voice: Arc<Mutex<Voice>>) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::SinkUnavailable("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| Error::SinkUnavailable(e.to_string()))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(Error::SinkUnavailable(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut voice = voice.lock().unwrap_or_else(PoisonError::into_inner);
                    for frame in data.chunks_mut(channels) {
                        let sample = voice.next_sample(sample_rate);
                        frame.fill(sample);
                    }
                },
                |err| warn!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::SinkUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::SinkUnavailable(e.to_string()))?;
        info!("audio preview running at {} Hz", sample_rate);
        Ok(stream)
    }
}

impl Default for AudioPreview {
    fn default() -> Self {
        Self::new()
    }
}

/// Event sink driving the preview voice.
pub struct ToneSink {
    voice: Arc<Mutex<Voice>>,
    live: Arc<AtomicBool>,
    open: bool,
}

impl EventSink for ToneSink {
    fn open(&mut self) -> Result<()> {
        if !self.live.load(Ordering::Relaxed) {
            return Err(Error::SinkUnavailable("no audio output device".into()));
        }
        self.open = true;
        Ok(())
    }

    fn send(&mut self, event: &NoteEvent) -> Result<()> {
        if !self.open {
            return Err(Error::Send("audio preview is not open".into()));
        }
        self.voice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.voice.lock().unwrap_or_else(PoisonError::into_inner).note = None;
    }
}

fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}
