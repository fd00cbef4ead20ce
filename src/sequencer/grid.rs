/// Step grid: note spans placed on (step x pitch row) cells
///
/// Spans on one row never overlap. Resizing is a two-phase edit: a
/// `ResizeEdit` carries the provisional (possibly negative) width while a
/// drag is in progress, and only `commit_resize` writes normalized
/// geometry back into the grid.
use std::fmt;

use log::debug;

use super::pitch::parse_pitch_label;
use super::schedule::{CompiledSchedule, EventOrder, NoteEvent};
use crate::config::{SessionConfig, DEFAULT_VELOCITY};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Geometry handed to the render sink. Width may be negative mid-drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanGeometry {
    pub start_step: i64,
    pub width: i64,
    pub row: usize,
}

/// External visual surface. The grid owns each handle from span creation
/// until removal and never looks inside it.
pub trait RenderSink {
    type Handle;

    fn create(&mut self, geometry: SpanGeometry) -> Self::Handle;
    fn update(&mut self, handle: &mut Self::Handle, geometry: SpanGeometry);
    fn remove(&mut self, handle: Self::Handle);
}

/// Render sink for grids without a retained visual (tests, immediate-mode UIs).
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl RenderSink for Headless {
    type Handle = ();

    fn create(&mut self, _geometry: SpanGeometry) {}
    fn update(&mut self, _handle: &mut (), _geometry: SpanGeometry) {}
    fn remove(&mut self, _handle: ()) {}
}

#[derive(Debug)]
pub struct NoteSpan<H = ()> {
    id: SpanId,
    start_step: usize,
    width: usize,
    pitch_row: usize,
    pitch_label: String,
    note_number: u8,
    render_handle: H,
}

impl<H> NoteSpan<H> {
    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn start_step(&self) -> usize {
        self.start_step
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Last step occupied, inclusive.
    pub fn end_step(&self) -> usize {
        self.start_step + self.width - 1
    }

    pub fn pitch_row(&self) -> usize {
        self.pitch_row
    }

    pub fn pitch_label(&self) -> &str {
        &self.pitch_label
    }

    pub fn note_number(&self) -> u8 {
        self.note_number
    }

    pub fn render_handle(&self) -> &H {
        &self.render_handle
    }

    pub fn contains(&self, step: usize) -> bool {
        self.start_step <= step && step <= self.end_step()
    }

    pub fn geometry(&self) -> SpanGeometry {
        SpanGeometry {
            start_step: self.start_step as i64,
            width: self.width as i64,
            row: self.pitch_row,
        }
    }
}

/// An in-progress drag-resize. Holds the provisional width; the span in
/// the grid is untouched until the edit is committed.
#[derive(Debug)]
pub struct ResizeEdit {
    span: SpanId,
    row: usize,
    anchor: usize,
    width: i64,
}

impl ResizeEdit {
    pub fn span(&self) -> SpanId {
        self.span
    }

    /// Provisional width; negative while dragging left of the anchor.
    pub fn width(&self) -> i64 {
        self.width
    }

    fn drag_to(&mut self, new_end: usize) {
        let width = new_end as i64 - self.anchor as i64 + 1;
        self.width = if width == 0 { 1 } else { width };
    }

    fn provisional(&self) -> SpanGeometry {
        SpanGeometry {
            start_step: self.anchor as i64,
            width: self.width,
            row: self.row,
        }
    }

    /// A negative width flips the anchor to the span's true left edge.
    fn normalized(&self) -> (usize, usize) {
        if self.width < 0 {
            let width = self.width.unsigned_abs() as usize;
            (self.anchor - width, width)
        } else {
            (self.anchor, self.width as usize)
        }
    }
}

/// Outcome of a place/remove toggle on one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Placed(SpanId),
    Removed(SpanId),
}

pub struct Grid<R: RenderSink = Headless> {
    step_count: usize,
    tone_list: Vec<String>,
    spans: Vec<NoteSpan<R::Handle>>,
    render: R,
    next_id: u64,
}

impl Grid<Headless> {
    pub fn new(step_count: usize, tone_list: Vec<String>) -> Result<Self> {
        Self::with_render(step_count, tone_list, Headless)
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::new(config.step_count, config.tone_list.clone())
    }
}

impl<R: RenderSink> Grid<R> {
    pub fn with_render(step_count: usize, tone_list: Vec<String>, render: R) -> Result<Self> {
        if step_count == 0 {
            return Err(Error::InvalidConfig("step count must be positive".into()));
        }
        if tone_list.is_empty() {
            return Err(Error::InvalidConfig("tone list is empty".into()));
        }
        for label in &tone_list {
            parse_pitch_label(label)?;
        }

        Ok(Self {
            step_count,
            tone_list,
            spans: Vec::new(),
            render,
            next_id: 0,
        })
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn row_count(&self) -> usize {
        self.tone_list.len()
    }

    pub fn tone_list(&self) -> &[String] {
        &self.tone_list
    }

    pub fn tone_label(&self, row: usize) -> Option<&str> {
        self.tone_list.get(row).map(String::as_str)
    }

    pub fn spans(&self) -> impl Iterator<Item = &NoteSpan<R::Handle>> {
        self.spans.iter()
    }

    pub fn span(&self, id: SpanId) -> Option<&NoteSpan<R::Handle>> {
        self.spans.iter().find(|span| span.id == id)
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn render(&self) -> &R {
        &self.render
    }

    /// The span on `row` whose inclusive step range contains `step`.
    pub fn hit_test(&self, step: usize, row: usize) -> Result<Option<&NoteSpan<R::Handle>>> {
        self.check_cell(step, row)?;
        Ok(self
            .spans
            .iter()
            .find(|span| span.pitch_row == row && span.contains(step)))
    }

    /// Places a span. Rejected without mutation if any of its cells is taken.
    pub fn add_span(
        &mut self,
        step: usize,
        row: usize,
        width: usize,
        pitch_label: &str,
    ) -> Result<SpanId> {
        self.check_cell(step, row)?;
        if width == 0 {
            return Err(Error::ZeroWidth);
        }
        // step < step_count here, so this cannot underflow
        if width > self.step_count - step {
            return Err(Error::OutOfGrid {
                step: self.step_count,
                row,
            });
        }
        let end = step + width - 1;
        if let Some(taken) = self.first_conflict(row, step, end, None) {
            return Err(Error::CellOccupied { step: taken, row });
        }
        let note_number = parse_pitch_label(pitch_label)?;

        let id = SpanId(self.next_id);
        self.next_id += 1;

        let geometry = SpanGeometry {
            start_step: step as i64,
            width: width as i64,
            row,
        };
        let render_handle = self.render.create(geometry);

        self.spans.push(NoteSpan {
            id,
            start_step: step,
            width,
            pitch_row: row,
            pitch_label: pitch_label.to_string(),
            note_number,
            render_handle,
        });
        debug!(
            "added span {} at step {} row {} width {} ({})",
            id, step, row, width, pitch_label
        );
        Ok(id)
    }

    /// A one-step span labelled with the row's tone.
    pub fn place(&mut self, step: usize, row: usize) -> Result<SpanId> {
        self.check_cell(step, row)?;
        let label = self.tone_list[row].clone();
        self.add_span(step, row, 1, &label)
    }

    /// Removes the span under the cell, or places a new one if it is empty.
    pub fn toggle_at(&mut self, step: usize, row: usize) -> Result<Toggled> {
        match self.hit_test(step, row)?.map(NoteSpan::id) {
            Some(id) => {
                self.remove_span(id)?;
                Ok(Toggled::Removed(id))
            }
            None => self.place(step, row).map(Toggled::Placed),
        }
    }

    /// Releases the span's render handle and drops it from the grid.
    pub fn remove_span(&mut self, id: SpanId) -> Result<()> {
        let index = self.index_of(id)?;
        let span = self.spans.remove(index);
        self.render.remove(span.render_handle);
        debug!("removed span {}", id);
        Ok(())
    }

    pub fn clear(&mut self) {
        for span in self.spans.drain(..) {
            self.render.remove(span.render_handle);
        }
    }

    pub fn begin_resize(&self, id: SpanId) -> Result<ResizeEdit> {
        let span = &self.spans[self.index_of(id)?];
        Ok(ResizeEdit {
            span: id,
            row: span.pitch_row,
            anchor: span.start_step,
            width: span.width as i64,
        })
    }

    /// Moves the drag end. Only the edit and the render sink change.
    pub fn drag_resize(&mut self, edit: &mut ResizeEdit, new_end: usize) -> Result<()> {
        self.check_cell(new_end, edit.row)?;
        let index = self.index_of(edit.span)?;
        edit.drag_to(new_end);
        self.render
            .update(&mut self.spans[index].render_handle, edit.provisional());
        Ok(())
    }

    /// Normalizes the edit and writes it back. On conflict the span keeps
    /// its previous geometry.
    pub fn commit_resize(&mut self, edit: ResizeEdit) -> Result<()> {
        let index = self.index_of(edit.span)?;
        let (start, width) = edit.normalized();
        let end = start + width - 1;

        if let Some(taken) = self.first_conflict(edit.row, start, end, Some(edit.span)) {
            let previous = self.spans[index].geometry();
            self.render
                .update(&mut self.spans[index].render_handle, previous);
            return Err(Error::CellOccupied {
                step: taken,
                row: edit.row,
            });
        }

        let span = &mut self.spans[index];
        span.start_step = start;
        span.width = width;
        let geometry = span.geometry();
        self.render.update(&mut span.render_handle, geometry);
        debug!(
            "resized span {} to steps {}..={}",
            edit.span,
            start,
            start + width - 1
        );
        Ok(())
    }

    pub fn cancel_resize(&mut self, edit: ResizeEdit) {
        if let Ok(index) = self.index_of(edit.span) {
            let previous = self.spans[index].geometry();
            self.render
                .update(&mut self.spans[index].render_handle, previous);
        }
    }

    /// Single-shot resize: `width = new_end - start_step + 1`, normalized.
    pub fn resize_span(&mut self, id: SpanId, new_end: usize) -> Result<()> {
        let mut edit = self.begin_resize(id)?;
        self.drag_resize(&mut edit, new_end)?;
        self.commit_resize(edit)
    }

    pub fn compile_schedule(&self) -> CompiledSchedule {
        self.compile_schedule_with(EventOrder::default(), DEFAULT_VELOCITY)
    }

    /// Note-ons at each span's start step, note-offs at the step after its
    /// end. A span ending on the last step gets no note-off; held notes
    /// are released when playback stops.
    pub fn compile_schedule_with(&self, order: EventOrder, velocity: u8) -> CompiledSchedule {
        let steps: Vec<Vec<NoteEvent>> = (0..self.step_count)
            .map(|i| {
                let ons = self
                    .spans
                    .iter()
                    .filter(|span| span.start_step == i)
                    .map(|span| NoteEvent::NoteOn {
                        note: span.note_number,
                        velocity,
                    });
                let offs = self
                    .spans
                    .iter()
                    .filter(|span| span.end_step() + 1 == i)
                    .map(|span| NoteEvent::NoteOff {
                        note: span.note_number,
                    });

                match order {
                    EventOrder::OnBeforeOff => ons.chain(offs).collect(),
                    EventOrder::OffBeforeOn => offs.chain(ons).collect(),
                }
            })
            .collect();

        let schedule = CompiledSchedule::new(steps);
        debug!(
            "compiled {} spans into {} events over {} steps",
            self.spans.len(),
            schedule.event_count(),
            schedule.len()
        );
        schedule
    }

    fn check_cell(&self, step: usize, row: usize) -> Result<()> {
        if step >= self.step_count || row >= self.tone_list.len() {
            return Err(Error::OutOfGrid { step, row });
        }
        Ok(())
    }

    fn index_of(&self, id: SpanId) -> Result<usize> {
        self.spans
            .iter()
            .position(|span| span.id == id)
            .ok_or(Error::UnknownSpan(id))
    }

    fn first_conflict(
        &self,
        row: usize,
        start: usize,
        end: usize,
        except: Option<SpanId>,
    ) -> Option<usize> {
        self.spans
            .iter()
            .filter(|span| span.pitch_row == row && Some(span.id) != except)
            .filter(|span| span.start_step <= end && start <= span.end_step())
            .map(|span| span.start_step.max(start))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::from_config(&SessionConfig::default()).unwrap()
    }

    #[derive(Default)]
    struct RecordingRender {
        next: usize,
        live: Vec<(usize, SpanGeometry)>,
        removed: Vec<usize>,
    }

    impl RenderSink for RecordingRender {
        type Handle = usize;

        fn create(&mut self, geometry: SpanGeometry) -> usize {
            self.next += 1;
            self.live.push((self.next, geometry));
            self.next
        }

        fn update(&mut self, handle: &mut usize, geometry: SpanGeometry) {
            if let Some(entry) = self.live.iter_mut().find(|(h, _)| h == handle) {
                entry.1 = geometry;
            }
        }

        fn remove(&mut self, handle: usize) {
            self.live.retain(|(h, _)| *h != handle);
            self.removed.push(handle);
        }
    }

    #[test]
    fn test_add_and_hit_test() {
        let mut grid = grid();
        let id = grid.add_span(2, 0, 3, "do3").unwrap();

        let span = grid.hit_test(3, 0).unwrap().unwrap();
        assert_eq!(span.id(), id);
        assert_eq!(span.end_step(), 4);
        assert_eq!(span.note_number(), 48);
        assert!(grid.hit_test(5, 0).unwrap().is_none());
        assert!(grid.hit_test(3, 1).unwrap().is_none());
    }

    #[test]
    fn test_add_rejects_occupied_cell() {
        let mut grid = grid();
        grid.add_span(1, 0, 3, "do3").unwrap();

        let err = grid.add_span(2, 0, 1, "do3").unwrap_err();
        assert!(matches!(err, Error::CellOccupied { step: 2, row: 0 }));
        assert!(err.is_precondition_violation());
        assert!(grid.add_span(0, 0, 2, "do3").is_err());
        assert_eq!(grid.len(), 1);

        // other rows are independent
        assert!(grid.add_span(2, 1, 1, "do#3").is_ok());
    }

    #[test]
    fn test_add_rejects_bad_input_without_mutation() {
        let mut grid = grid();
        assert!(matches!(
            grid.add_span(0, 0, 1, "ut3"),
            Err(Error::InvalidPitchLabel(_))
        ));
        assert!(matches!(
            grid.add_span(16, 0, 1, "do3"),
            Err(Error::OutOfGrid { .. })
        ));
        assert!(matches!(
            grid.add_span(15, 0, 2, "do3"),
            Err(Error::OutOfGrid { .. })
        ));
        assert!(matches!(grid.add_span(0, 0, 0, "do3"), Err(Error::ZeroWidth)));
        assert!(matches!(
            grid.add_span(1, 0, usize::MAX, "do3"),
            Err(Error::OutOfGrid { .. })
        ));
        assert!(grid.hit_test(0, 13).is_err());
        assert!(grid.is_empty());
    }

    #[test]
    fn test_toggle_places_then_removes() {
        let mut grid = grid();
        let placed = grid.toggle_at(4, 12).unwrap();
        let Toggled::Placed(id) = placed else {
            panic!("expected a placed span");
        };
        assert_eq!(grid.span(id).unwrap().pitch_label(), "do4");
        assert_eq!(grid.toggle_at(4, 12).unwrap(), Toggled::Removed(id));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_remove_then_hit_test_is_empty() {
        let mut grid = grid();
        let id = grid.add_span(6, 2, 2, "re3").unwrap();
        grid.remove_span(id).unwrap();

        assert!(grid.hit_test(6, 2).unwrap().is_none());
        assert!(grid.hit_test(7, 2).unwrap().is_none());
        assert!(matches!(grid.remove_span(id), Err(Error::UnknownSpan(_))));
    }

    #[test]
    fn test_resize_left_normalizes() {
        let mut grid = grid();
        let id = grid.add_span(5, 0, 1, "do3").unwrap();
        grid.resize_span(id, 2).unwrap();

        let span = grid.span(id).unwrap();
        assert_eq!(span.start_step(), 3);
        assert_eq!(span.width(), 2);
        assert_eq!(span.end_step(), 4);
    }

    #[test]
    fn test_resize_zero_width_clamps_to_one() {
        let mut grid = grid();
        let id = grid.add_span(5, 0, 3, "do3").unwrap();

        grid.resize_span(id, 5).unwrap();
        assert_eq!(grid.span(id).unwrap().width(), 1);

        let mut edit = grid.begin_resize(id).unwrap();
        grid.drag_resize(&mut edit, 4).unwrap();
        assert_eq!(edit.width(), 1);
        grid.commit_resize(edit).unwrap();
        let span = grid.span(id).unwrap();
        assert_eq!((span.start_step(), span.width()), (5, 1));
    }

    #[test]
    fn test_drag_is_provisional_until_commit() {
        let mut grid = Grid::with_render(16, vec!["do3".into()], RecordingRender::default())
            .unwrap();
        let id = grid.add_span(8, 0, 1, "do3").unwrap();

        let mut edit = grid.begin_resize(id).unwrap();
        grid.drag_resize(&mut edit, 12).unwrap();
        grid.drag_resize(&mut edit, 3).unwrap();
        assert_eq!(edit.width(), -4);
        assert_eq!(grid.render().live[0].1.width, -4);
        assert_eq!(grid.span(id).unwrap().width(), 1);

        grid.commit_resize(edit).unwrap();
        let span = grid.span(id).unwrap();
        assert_eq!((span.start_step(), span.width()), (4, 4));
        assert_eq!(grid.render().live[0].1, span.geometry());
    }

    #[test]
    fn test_commit_rejects_overlap() {
        let mut grid = grid();
        let id = grid.add_span(0, 0, 1, "do3").unwrap();
        grid.add_span(4, 0, 1, "do3").unwrap();

        let err = grid.resize_span(id, 6).unwrap_err();
        assert!(matches!(err, Error::CellOccupied { step: 4, row: 0 }));
        assert_eq!(grid.span(id).unwrap().width(), 1);
        assert!(grid.resize_span(id, 3).is_ok());
    }

    #[test]
    fn test_cancel_restores_render() {
        let mut grid = Grid::with_render(8, vec!["mi4".into()], RecordingRender::default())
            .unwrap();
        let id = grid.add_span(2, 0, 2, "mi4").unwrap();
        let mut edit = grid.begin_resize(id).unwrap();
        grid.drag_resize(&mut edit, 7).unwrap();
        grid.cancel_resize(edit);

        assert_eq!(grid.render().live[0].1, grid.span(id).unwrap().geometry());
    }

    #[test]
    fn test_remove_releases_render_handle() {
        let mut grid = Grid::with_render(8, vec!["mi4".into()], RecordingRender::default())
            .unwrap();
        let a = grid.add_span(0, 0, 1, "mi4").unwrap();
        grid.add_span(3, 0, 1, "mi4").unwrap();
        let handle = *grid.span(a).unwrap().render_handle();

        grid.remove_span(a).unwrap();
        assert_eq!(grid.render().removed, vec![handle]);
        grid.clear();
        assert!(grid.render().live.is_empty());
        assert_eq!(grid.render().removed.len(), 2);
    }

    #[test]
    fn test_compile_single_span() {
        let mut grid = grid();
        grid.add_span(2, 0, 3, "do3").unwrap();
        let schedule = grid.compile_schedule();

        assert_eq!(schedule.len(), 16);
        for (step, events) in schedule.steps().enumerate() {
            match step {
                2 => assert_eq!(
                    events,
                    &[NoteEvent::NoteOn {
                        note: 48,
                        velocity: DEFAULT_VELOCITY
                    }]
                ),
                5 => assert_eq!(events, &[NoteEvent::NoteOff { note: 48 }]),
                _ => assert!(events.is_empty(), "unexpected events at step {step}"),
            }
        }
    }

    #[test]
    fn test_compile_orders_events_within_step() {
        let mut grid = grid();
        grid.add_span(0, 0, 2, "do3").unwrap();
        grid.add_span(2, 4, 1, "mi3").unwrap();

        let on_first = grid.compile_schedule();
        assert!(on_first.events_at(2)[0].is_note_on());
        assert_eq!(on_first.events_at(2)[1], NoteEvent::NoteOff { note: 48 });

        let off_first = grid.compile_schedule_with(EventOrder::OffBeforeOn, 100);
        assert_eq!(
            off_first.events_at(2),
            &[
                NoteEvent::NoteOff { note: 48 },
                NoteEvent::NoteOn {
                    note: 52,
                    velocity: 100
                },
            ]
        );
    }

    #[test]
    fn test_compile_tail_span_has_no_release() {
        let mut grid = grid();
        grid.add_span(14, 0, 2, "do3").unwrap();
        let schedule = grid.compile_schedule();
        assert!(schedule.events_at(0).is_empty());
        assert_eq!(schedule.event_count(), 1);
    }

    #[test]
    fn test_compile_full_loop_span() {
        let mut grid = grid();
        grid.add_span(0, 0, 16, "do3").unwrap();
        let schedule = grid.compile_schedule();
        assert_eq!(
            schedule.events_at(0),
            &[NoteEvent::NoteOn {
                note: 48,
                velocity: DEFAULT_VELOCITY
            }]
        );
        assert_eq!(schedule.event_count(), 1);
    }

    #[test]
    fn test_compile_first_and_last_step_on_one_row() {
        let mut grid = grid();
        grid.add_span(0, 0, 1, "do3").unwrap();
        grid.add_span(15, 0, 1, "do3").unwrap();
        let schedule = grid.compile_schedule();

        let on = NoteEvent::NoteOn {
            note: 48,
            velocity: DEFAULT_VELOCITY,
        };
        assert_eq!(schedule.events_at(0), &[on]);
        assert_eq!(schedule.events_at(1), &[NoteEvent::NoteOff { note: 48 }]);
        assert_eq!(schedule.events_at(15), &[on]);
        assert_eq!(schedule.event_count(), 3);
    }

    #[test]
    fn test_compile_is_repeatable() {
        let mut grid = grid();
        grid.add_span(0, 0, 4, "do3").unwrap();
        grid.add_span(3, 7, 2, "sol3").unwrap();
        grid.add_span(9, 12, 5, "do4").unwrap();
        assert_eq!(grid.compile_schedule(), grid.compile_schedule());
    }
}
