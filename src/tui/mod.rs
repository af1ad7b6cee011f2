mod helpers;
mod render;
mod types;

pub use helpers::expand_path;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use ratatui_image::picker::Picker;
use ratatui_image::protocol::StatefulProtocol;
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::input::Gesture;
use crate::screen::viewer::{cell_to_pixel, to_protocol};
use crate::session::{SessionController, SessionSnapshot};

use types::{DragState, Intent, InputMode, DIAL_NOTCH};

const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const EVENT_POLL: Duration = Duration::from_millis(30);

pub struct RemoteUI {
    pub(crate) controller: SessionController,
    pub(crate) snapshot: SessionSnapshot,
    pub(crate) picker: Picker,
    /// Rendered image of the latest frame
    pub(crate) protocol: Option<StatefulProtocol>,
    pub(crate) frame_token: u64,
    /// Where the frame was drawn last time, for mouse hit-testing
    pub(crate) frame_rect: Rect,
    pub(crate) mode: InputMode,
    pub(crate) drag: Option<DragState>,
}

impl RemoteUI {
    pub fn new(controller: SessionController, picker: Picker) -> Self {
        let snapshot = controller.snapshot();
        Self {
            controller,
            snapshot,
            picker,
            protocol: None,
            frame_token: 0,
            frame_rect: Rect::default(),
            mode: InputMode::Remote,
            drag: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let mut updates = self.controller.subscribe();
        let result = self.run_loop(&mut terminal, &mut updates).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture,
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        updates: &mut watch::Receiver<SessionSnapshot>,
    ) -> Result<()> {
        let mut last_device_poll = Instant::now();
        self.controller.refresh_devices();

        loop {
            if updates.has_changed().unwrap_or(false) {
                self.snapshot = updates.borrow_and_update().clone();
                self.sync_frame();
            }

            terminal.draw(|f| self.ui(f))?;

            if last_device_poll.elapsed() >= DEVICE_POLL_INTERVAL {
                self.controller.poll_devices();
                last_device_poll = Instant::now();
            }

            if event::poll(EVENT_POLL)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key) {
                            return Ok(());
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    _ => {}
                }
            }

            // Let spawned session tasks run between redraws
            tokio::task::yield_now().await;
        }
    }

    /// Re-encode the image when the session published a new frame.
    fn sync_frame(&mut self) {
        if self.snapshot.frame_token == self.frame_token && self.protocol.is_some() {
            return;
        }
        self.frame_token = self.snapshot.frame_token;
        self.protocol = self
            .snapshot
            .frame
            .as_ref()
            .map(|frame| to_protocol(frame, &mut self.picker));
    }

    /// Returns true when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if let InputMode::Keyboard {
            buffer,
            apply_after,
        } = &mut self.mode
        {
            match key.code {
                KeyCode::Esc => self.mode = InputMode::Remote,
                KeyCode::Tab => *apply_after = !*apply_after,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    *buffer = crate::input::text::sanitize(buffer);
                }
                KeyCode::Enter => {
                    let (text, apply) = (buffer.clone(), *apply_after);
                    self.mode = InputMode::Remote;
                    self.controller.send_text(&text, apply);
                }
                _ => {}
            }
            return false;
        }

        let Some(intent) = helpers::key_intent(key) else {
            return false;
        };
        match intent {
            Intent::Quit => return true,
            Intent::Press(action) => {
                self.controller.press(action);
            }
            Intent::Dial(delta) => self.dial(delta),
            Intent::Connect => {
                self.controller.connect();
            }
            Intent::Disconnect => {
                self.controller.disconnect();
            }
            Intent::NextDevice => self.controller.select_next_device(),
            Intent::CycleProfile => self.controller.cycle_profile(),
            Intent::ToggleFine => self.controller.toggle_fine_mode(),
            Intent::ToggleTouchLock => {
                let locked = !self.snapshot.touch_lock;
                self.controller.set_touch_lock(locked);
            }
            Intent::OpenKeyboard => {
                self.mode = InputMode::Keyboard {
                    buffer: String::new(),
                    apply_after: false,
                };
            }
        }
        false
    }

    fn dial(&self, delta: f32) {
        self.controller.encoder_start(Gesture::Dial);
        self.controller.encoder_move(Gesture::Dial, delta);
        self.controller.encoder_end(Gesture::Dial);
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let (col, row) = (mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::ScrollUp => self.dial(DIAL_NOTCH),
            MouseEventKind::ScrollDown => self.dial(-DIAL_NOTCH),
            MouseEventKind::Down(MouseButton::Left) => {
                if self.hit_pixel(col, row).is_some() {
                    self.drag = Some(DragState::new(col, row));
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let cell_width = self.picker.font_size().0.max(1) as f32;
                let Some(drag) = self.drag.as_mut() else {
                    return;
                };
                if col == drag.last_col {
                    return;
                }
                if !drag.moved {
                    drag.moved = true;
                    self.controller.encoder_start(Gesture::Drag);
                }
                let delta = (col as f32 - drag.last_col as f32) * cell_width;
                drag.last_col = col;
                self.controller.encoder_move(Gesture::Drag, delta);
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let Some(drag) = self.drag.take() else {
                    return;
                };
                if drag.moved {
                    self.controller.encoder_end(Gesture::Drag);
                } else if let Some((x, y)) = self.hit_pixel(drag.start.0, drag.start.1) {
                    self.controller.touch(x as i64, y as i64);
                }
            }
            _ => {}
        }
    }

    fn hit_pixel(&self, col: u16, row: u16) -> Option<(u32, u32)> {
        let size = self.snapshot.screen_size;
        cell_to_pixel(self.frame_rect, col, row, size.width(), size.height())
    }
}
