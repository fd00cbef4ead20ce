#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use gridseq::{
    config::bpm_for_interval, config::interval_for_bpm, AudioPreview, Error, EventOrder,
    EventSink, MidiOutputDevice, NoteEvent, ResizeEdit, Result, Sequencer, SessionConfig,
    ToneSink, Toggled,
};

#[cfg(feature = "gui")]
fn main() -> std::result::Result<(), eframe::Error> {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 560.0])
            .with_title("gridseq - Step Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "gridseq",
        options,
        Box::new(|_cc| Ok(Box::new(SequencerApp::new()?))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
const LABEL_WIDTH: f32 = 48.0;
#[cfg(feature = "gui")]
const CELL_WIDTH: f32 = 36.0;
#[cfg(feature = "gui")]
const CELL_HEIGHT: f32 = 24.0;

/// MIDI when a port is selected, plus the audio preview when a device exists.
#[cfg(feature = "gui")]
struct AppOutput {
    midi: MidiOutputDevice,
    midi_selected: bool,
    midi_open: bool,
    tone: ToneSink,
    tone_open: bool,
}

#[cfg(feature = "gui")]
impl EventSink for AppOutput {
    fn open(&mut self) -> Result<()> {
        if self.midi_selected {
            self.midi.open()?;
            self.midi_open = true;
        }
        self.tone_open = self.tone.open().is_ok();

        if !self.midi_open && !self.tone_open {
            return Err(Error::SinkUnavailable(
                "no MIDI port selected and no audio device".into(),
            ));
        }
        Ok(())
    }

    fn send(&mut self, event: &NoteEvent) -> Result<()> {
        if self.midi_open {
            self.midi.send(event)?;
        }
        if self.tone_open {
            self.tone.send(event)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.midi_open) {
            self.midi.close();
        }
        if std::mem::take(&mut self.tone_open) {
            self.tone.close();
        }
    }
}

#[cfg(feature = "gui")]
struct SequencerApp {
    sequencer: Sequencer<AppOutput>,
    preview: AudioPreview,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    edit: Option<ResizeEdit>,
    bpm: f32,
    status: Option<String>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new() -> Result<Self> {
        let preview = AudioPreview::new();
        let config = SessionConfig::default();
        let bpm = bpm_for_interval(config.playback_interval);
        let output = AppOutput {
            midi: MidiOutputDevice::new(config.midi_port),
            midi_selected: false,
            midi_open: false,
            tone: preview.sink(),
            tone_open: false,
        };

        let sequencer = Sequencer::new(config, output)?;

        Ok(Self {
            sequencer,
            preview,
            available_midi_ports: MidiOutputDevice::available_ports(),
            selected_port: None,
            edit: None,
            bpm,
            status: None,
        })
    }

    fn report(&mut self, result: Result<()>) {
        if let Err(err) = result {
            log::warn!("{}", err);
            self.status = Some(err.to_string());
        }
    }

    fn toggle_playback(&mut self) {
        self.status = None;
        let result = self.sequencer.toggle_play().map(|_| ());
        self.report(result);
    }

    fn select_port(&mut self, port: usize) {
        self.selected_port = Some(port);
        self.sequencer.with_sink(|output| {
            output.midi.select_port(Some(port));
            output.midi_selected = true;
        });
    }

    /// Press on an empty cell places a span and starts resizing it; press
    /// on a span removes it.
    fn mouse_down(&mut self, step: usize, row: usize) {
        let grid = self.sequencer.grid_mut();
        let result = grid.toggle_at(step, row).and_then(|toggled| match toggled {
            Toggled::Placed(id) => grid.begin_resize(id).map(Some),
            Toggled::Removed(_) => Ok(None),
        });
        match result {
            Ok(edit) => self.edit = edit,
            Err(err) => self.report(Err(err)),
        }
    }

    fn mouse_drag(&mut self, step: usize) {
        if let Some(edit) = self.edit.as_mut() {
            let result = self.sequencer.grid_mut().drag_resize(edit, step);
            self.report(result);
        }
    }

    fn mouse_up(&mut self) {
        if let Some(edit) = self.edit.take() {
            let result = self.sequencer.grid_mut().commit_resize(edit);
            self.report(result);
        }
    }

    fn draw_grid(&mut self, ui: &mut egui::Ui) {
        let grid = self.sequencer.grid();
        let (steps, rows) = (grid.step_count(), grid.row_count());
        let size = egui::vec2(
            LABEL_WIDTH + steps as f32 * CELL_WIDTH,
            rows as f32 * CELL_HEIGHT,
        );
        let (response, painter) = ui.allocate_painter(size, egui::Sense::click_and_drag());
        let origin = response.rect.min + egui::vec2(LABEL_WIDTH, 0.0);
        let cell_rect = |step: f32, row: usize, width: f32| {
            egui::Rect::from_min_size(
                origin + egui::vec2(step * CELL_WIDTH, row as f32 * CELL_HEIGHT),
                egui::vec2(width * CELL_WIDTH, CELL_HEIGHT),
            )
        };

        let playing_step = self.sequencer.current_step();
        for row in 0..rows {
            let label = grid.tone_label(row).unwrap_or_default();
            painter.text(
                origin + egui::vec2(-6.0, (row as f32 + 0.5) * CELL_HEIGHT),
                egui::Align2::RIGHT_CENTER,
                label,
                egui::FontId::monospace(11.0),
                egui::Color32::LIGHT_GRAY,
            );
            for step in 0..steps {
                let fill = if playing_step == Some(step) {
                    egui::Color32::from_rgb(40, 70, 40)
                } else if step % 4 == 0 {
                    egui::Color32::from_gray(45)
                } else {
                    egui::Color32::from_gray(30)
                };
                let rect = cell_rect(step as f32, row, 1.0);
                painter.rect_filled(rect, 0.0, fill);
                painter.rect_stroke(rect, 0.0, egui::Stroke::new(1.0, egui::Color32::from_gray(60)));
            }
        }

        for span in grid.spans() {
            let (start, width) = match &self.edit {
                Some(edit) if edit.span() == span.id() => {
                    let w = edit.width();
                    if w < 0 {
                        (span.start_step() as f32 + w as f32, -w as f32)
                    } else {
                        (span.start_step() as f32, w as f32)
                    }
                }
                _ => (span.start_step() as f32, span.width() as f32),
            };
            let rect = cell_rect(start, span.pitch_row(), width).shrink(2.0);
            painter.rect_filled(rect, 3.0, egui::Color32::from_rgb(200, 60, 60));
            painter.rect_stroke(rect, 3.0, egui::Stroke::new(1.0, egui::Color32::BLACK));
        }

        let (pressed, down, released, pointer) = ui.input(|i| {
            (
                i.pointer.primary_pressed(),
                i.pointer.primary_down(),
                i.pointer.primary_released(),
                i.pointer.interact_pos(),
            )
        });
        let to_cell = |pos: egui::Pos2| {
            let local = pos - origin;
            let step = (local.x / CELL_WIDTH).floor();
            let row = (local.y / CELL_HEIGHT).floor();
            (step, row)
        };

        if let Some(pos) = pointer {
            let (step, row) = to_cell(pos);
            if pressed && response.hovered() {
                if step >= 0.0 && row >= 0.0 && (step as usize) < steps && (row as usize) < rows {
                    self.mouse_down(step as usize, row as usize);
                }
            } else if down && self.edit.is_some() {
                let step = step.clamp(0.0, (steps - 1) as f32) as usize;
                self.mouse_drag(step);
            }
        }
        if released {
            self.mouse_up();
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.sequencer.is_playing() {
            ctx.request_repaint();
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("gridseq - Step Sequencer");
            ui.add_space(10.0);

            // MIDI Port Selection
            let mut selected_port_changed = None;
            ui.horizontal(|ui| {
                ui.label("MIDI Output:");
                if self.available_midi_ports.is_empty() {
                    ui.label("No MIDI ports available");
                } else {
                    egui::ComboBox::from_label("")
                        .selected_text(
                            self.selected_port
                                .and_then(|i| self.available_midi_ports.get(i))
                                .map(String::as_str)
                                .unwrap_or("Select port..."),
                        )
                        .show_ui(ui, |ui| {
                            for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                                if ui
                                    .selectable_label(self.selected_port == Some(i), port_name)
                                    .clicked()
                                {
                                    selected_port_changed = Some(i);
                                }
                            }
                        });
                }
            });
            if let Some(port_idx) = selected_port_changed {
                self.select_port(port_idx);
            }

            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                let label = if self.sequencer.is_playing() {
                    "⏹ Stop"
                } else {
                    "▶ Play"
                };
                if ui.button(label).clicked() {
                    self.toggle_playback();
                }

                ui.add_space(20.0);

                ui.label("BPM:");
                if ui
                    .add(egui::Slider::new(&mut self.bpm, 40.0..=240.0).step_by(1.0))
                    .changed()
                {
                    let result = self.sequencer.set_interval(interval_for_bpm(self.bpm));
                    self.report(result);
                }

                ui.add_space(20.0);

                let mut release_first =
                    self.sequencer.config().event_order == EventOrder::OffBeforeOn;
                if ui.checkbox(&mut release_first, "Release before attack").changed() {
                    self.sequencer.set_event_order(if release_first {
                        EventOrder::OffBeforeOn
                    } else {
                        EventOrder::OnBeforeOff
                    });
                }

                ui.add_space(20.0);

                if ui
                    .add_enabled(!self.sequencer.is_playing(), egui::Button::new("Clear"))
                    .clicked()
                {
                    self.edit = None;
                    self.sequencer.grid_mut().clear();
                }
            });

            ui.add_space(20.0);
            self.draw_grid(ui);

            // Info
            ui.separator();
            ui.label("Click a cell to place a note, drag to stretch it, click a note to remove it");
            if self.sequencer.is_playing() {
                ui.label("Edits apply the next time playback starts");
            }
            if self.selected_port.is_none() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No MIDI output selected - audio preview only",
                );
            }
            if !self.preview.is_available() {
                ui.colored_label(egui::Color32::YELLOW, "⚠ No audio output device");
            }
            if let Some(status) = &self.status {
                ui.colored_label(egui::Color32::LIGHT_RED, status);
            }
        });
    }
}
