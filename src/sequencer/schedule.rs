/// Step-indexed note events compiled from the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
}

impl NoteEvent {
    pub fn note(&self) -> u8 {
        match *self {
            NoteEvent::NoteOn { note, .. } | NoteEvent::NoteOff { note } => note,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, NoteEvent::NoteOn { .. })
    }
}

/// Order of note-on and note-off events that land on the same step.
///
/// `OnBeforeOff` matches the historical behavior. `OffBeforeOn` releases
/// old notes before attacking new ones, which keeps a retriggered pitch
/// sounding when one span ends exactly where another begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOrder {
    #[default]
    OnBeforeOff,
    OffBeforeOn,
}

/// Read-only artifact produced once per play-start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSchedule {
    events_by_step: Vec<Vec<NoteEvent>>,
}

impl CompiledSchedule {
    pub(crate) fn new(events_by_step: Vec<Vec<NoteEvent>>) -> Self {
        Self { events_by_step }
    }

    /// Number of steps, equal to the grid's step count.
    pub fn len(&self) -> usize {
        self.events_by_step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events_by_step.is_empty()
    }

    pub fn events_at(&self, step: usize) -> &[NoteEvent] {
        self.events_by_step
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn steps(&self) -> impl Iterator<Item = &[NoteEvent]> {
        self.events_by_step.iter().map(Vec::as_slice)
    }

    pub fn event_count(&self) -> usize {
        self.events_by_step.iter().map(Vec::len).sum()
    }
}
