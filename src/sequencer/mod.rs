/// Core sequencer logic - grid model, compiled schedule and playback control
///
/// The grid is edited on the caller's thread. `play` compiles it once and
/// hands the frozen schedule to the clock thread; later edits only take
/// effect on the next `play`.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

pub mod clock;
pub mod grid;
pub mod pitch;
pub mod schedule;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use clock::Clock;
use grid::{Grid, Headless, RenderSink};
use schedule::{CompiledSchedule, NoteEvent};

const NO_STEP: usize = usize::MAX;

/// Destination for note events, e.g. a MIDI port.
///
/// `open` is called by `play`, `close` by `stop` once the clock thread has
/// exited, so `send` never races `close`.
pub trait EventSink: Send + 'static {
    fn open(&mut self) -> Result<()>;
    fn send(&mut self, event: &NoteEvent) -> Result<()>;
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
}

/// The sink plus the notes it is currently sounding.
struct Output<S> {
    sink: S,
    sounding: Vec<u8>,
}

impl<S: EventSink> Output<S> {
    fn emit(&mut self, event: &NoteEvent) {
        if let Err(err) = self.sink.send(event) {
            warn!("dropped {:?}: {}", event, err);
            return;
        }
        let note = event.note();
        if event.is_note_on() {
            self.sounding.push(note);
        } else if let Some(index) = self.sounding.iter().position(|n| *n == note) {
            self.sounding.swap_remove(index);
        }
    }

    fn release_all(&mut self) {
        let mut held = std::mem::take(&mut self.sounding);
        held.sort_unstable();
        held.dedup();
        for note in held {
            if let Err(err) = self.sink.send(&NoteEvent::NoteOff { note }) {
                warn!("failed to release note {}: {}", note, err);
            }
        }
    }
}

/// Walks a compiled schedule one step per tick, wrapping at its length.
struct Playhead {
    schedule: CompiledSchedule,
    cursor: usize,
}

impl Playhead {
    fn new(schedule: CompiledSchedule) -> Self {
        Self {
            schedule,
            cursor: 0,
        }
    }

    /// Emits the events at the cursor and advances. Returns the step fired.
    fn tick<S: EventSink>(&mut self, output: &mut Output<S>) -> usize {
        let step = self.cursor;
        for event in self.schedule.events_at(step) {
            output.emit(event);
        }
        self.cursor = (step + 1) % self.schedule.len();
        step
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Sequencer<S: EventSink, R: RenderSink = Headless> {
    grid: Grid<R>,
    config: SessionConfig,
    output: Arc<Mutex<Output<S>>>,
    position: Arc<AtomicUsize>,
    clock: Option<Clock>,
}

impl<S: EventSink> Sequencer<S> {
    pub fn new(config: SessionConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let grid = Grid::from_config(&config)?;
        Self::with_grid(config, grid, sink)
    }
}

impl<S: EventSink, R: RenderSink> Sequencer<S, R> {
    /// Uses an existing grid, which must match the config's dimensions.
    pub fn with_grid(config: SessionConfig, grid: Grid<R>, sink: S) -> Result<Self> {
        config.validate()?;
        if grid.step_count() != config.step_count || grid.tone_list() != config.tone_list {
            return Err(Error::InvalidConfig(
                "grid does not match the session's steps and tones".into(),
            ));
        }

        Ok(Self {
            grid,
            config,
            output: Arc::new(Mutex::new(Output {
                sink,
                sounding: Vec::new(),
            })),
            position: Arc::new(AtomicUsize::new(NO_STEP)),
            clock: None,
        })
    }

    pub fn grid(&self) -> &Grid<R> {
        &self.grid
    }

    /// Edits are allowed while playing; they apply from the next `play`.
    pub fn grid_mut(&mut self) -> &mut Grid<R> {
        &mut self.grid
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        if self.clock.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_some()
    }

    /// Last step fired, if any step fired since `play`.
    pub fn current_step(&self) -> Option<usize> {
        match self.position.load(Ordering::Relaxed) {
            NO_STEP => None,
            step => Some(step),
        }
    }

    /// Takes effect on the next `play`.
    pub fn set_interval(&mut self, interval: std::time::Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "playback interval must be positive".into(),
            ));
        }
        self.config.playback_interval = interval;
        Ok(())
    }

    pub fn set_event_order(&mut self, order: schedule::EventOrder) {
        self.config.event_order = order;
    }

    /// Runs `f` with the sink locked. Blocks a tick in progress.
    pub fn with_sink<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        f(&mut lock(&self.output).sink)
    }

    /// Opens the sink, compiles the grid and starts the clock. On failure
    /// nothing changes and the sequencer stays stopped.
    pub fn play(&mut self) -> Result<()> {
        if self.clock.is_some() {
            return Err(Error::AlreadyPlaying);
        }

        lock(&self.output).sink.open()?;

        let schedule = self
            .grid
            .compile_schedule_with(self.config.event_order, self.config.velocity);
        let mut playhead = Playhead::new(schedule);
        self.position.store(NO_STEP, Ordering::Relaxed);

        let output = Arc::clone(&self.output);
        let position = Arc::clone(&self.position);
        let started = Clock::start(self.config.playback_interval, move || {
            let mut output = lock(&output);
            let step = playhead.tick(&mut *output);
            position.store(step, Ordering::Relaxed);
        });

        match started {
            Ok(clock) => {
                self.clock = Some(clock);
                info!(
                    "playing {} steps every {:?}",
                    self.grid.step_count(),
                    self.config.playback_interval
                );
                Ok(())
            }
            Err(err) => {
                lock(&self.output).sink.close();
                Err(err)
            }
        }
    }

    /// Stops the clock, waits for its thread, releases held notes and
    /// closes the sink.
    pub fn stop(&mut self) -> Result<()> {
        let clock = self.clock.take().ok_or(Error::NotPlaying)?;
        clock.cancel();

        let mut output = lock(&self.output);
        output.release_all();
        output.sink.close();
        self.position.store(NO_STEP, Ordering::Relaxed);
        info!("stopped");
        Ok(())
    }

    pub fn toggle_play(&mut self) -> Result<PlaybackState> {
        match self.state() {
            PlaybackState::Stopped => self.play()?,
            PlaybackState::Playing => self.stop()?,
        }
        Ok(self.state())
    }
}

impl<S: EventSink, R: RenderSink> Drop for Sequencer<S, R> {
    fn drop(&mut self) {
        if self.clock.is_some() {
            let _ = self.stop();
        }
    }
}
