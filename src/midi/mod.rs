/// MIDI output using midir
use log::{info, warn};
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{Error, Result};
use crate::sequencer::schedule::NoteEvent;
use crate::sequencer::EventSink;

const CLIENT_NAME: &str = "gridseq MIDI output";
const CHANNEL: u8 = 0;

/// Raw MIDI bytes for an event on channel `channel` (0-15).
pub fn midi_message(event: &NoteEvent, channel: u8) -> [u8; 3] {
    let channel = channel & 0x0F;
    match *event {
        NoteEvent::NoteOn { note, velocity } => [0x90 | channel, note & 0x7F, velocity & 0x7F],
        NoteEvent::NoteOff { note } => [0x80 | channel, note & 0x7F, 0],
    }
}

/// Event sink writing to a MIDI output port.
///
/// The port is chosen at `open`: the configured index if it exists,
/// otherwise the first available port.
pub struct MidiOutputDevice {
    port_index: Option<usize>,
    connection: Option<MidiOutputConnection>,
}

impl MidiOutputDevice {
    pub fn new(port_index: Option<usize>) -> Self {
        Self {
            port_index,
            connection: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    /// Applies on the next `open`.
    pub fn select_port(&mut self, port_index: Option<usize>) {
        self.port_index = port_index;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EventSink for MidiOutputDevice {
    fn open(&mut self) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| Error::SinkUnavailable(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = self
            .port_index
            .and_then(|index| ports.get(index))
            .or_else(|| ports.first())
            .ok_or_else(|| Error::SinkUnavailable("no MIDI output ports".into()))?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "gridseq")
            .map_err(|e| Error::SinkUnavailable(format!("failed to connect: {}", e)))?;

        info!("opened MIDI port {}", name);
        self.connection = Some(connection);
        Ok(())
    }

    fn send(&mut self, event: &NoteEvent) -> Result<()> {
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Send("MIDI output is not open".into()))?;
        conn.send(&midi_message(event, CHANNEL))
            .map_err(|e| Error::Send(e.to_string()))
    }

    fn close(&mut self) {
        match self.connection.take() {
            Some(conn) => {
                conn.close();
                info!("closed MIDI port");
            }
            None => warn!("close called on a MIDI output that was not open"),
        }
    }
}
