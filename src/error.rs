/// Errors raised by the grid model, the clock and the playback controller
use thiserror::Error;

use crate::sequencer::grid::SpanId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pitch label `{0}`")]
    InvalidPitchLabel(String),

    #[error("cell (step {step}, row {row}) is outside the grid")]
    OutOfGrid { step: usize, row: usize },

    #[error("step {step} on row {row} is already occupied")]
    CellOccupied { step: usize, row: usize },

    #[error("span width must be at least 1")]
    ZeroWidth,

    #[error("no span with id {0}")]
    UnknownSpan(SpanId),

    #[error("sequencer is already playing")]
    AlreadyPlaying,

    #[error("sequencer is not playing")]
    NotPlaying,

    #[error("event sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("failed to send event: {0}")]
    Send(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn clock thread: {0}")]
    ClockSpawn(#[from] std::io::Error),
}

impl Error {
    /// Caller or UI mistakes: wrong state, or coordinates the grid does not have.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Error::OutOfGrid { .. }
                | Error::CellOccupied { .. }
                | Error::ZeroWidth
                | Error::UnknownSpan(_)
                | Error::AlreadyPlaying
                | Error::NotPlaying
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
