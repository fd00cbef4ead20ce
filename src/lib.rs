/// gridseq - a grid step sequencer library
///
/// This library provides the core components of a looping step sequencer:
/// - A step grid of note spans with hit-testing and drag-resize editing
/// - Compilation of the grid into a per-step note event schedule
/// - A drift-corrected periodic clock on a background thread
/// - A playback controller driving an event sink (MIDI output, audio preview)

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioPreview, ToneSink};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use midi::MidiOutputDevice;
pub use sequencer::clock::Clock;
pub use sequencer::grid::{Grid, NoteSpan, RenderSink, ResizeEdit, SpanId, Toggled};
pub use sequencer::pitch::{note_number, parse_pitch_label, pitch_label_for};
pub use sequencer::schedule::{CompiledSchedule, EventOrder, NoteEvent};
pub use sequencer::{EventSink, PlaybackState, Sequencer};
