//! In-process stand-in for a PortaPack running Mayhem.
//!
//! Speaks the same shell dialect over a `tokio::io::duplex` pipe and renders a
//! small menu screen that reacts to buttons, touches, the encoder and the
//! keyboard. Used by `remote --demo` and by the session tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing::{debug, info};

use super::{DeviceInfo, DeviceProvider, LinkError, LinkStream};
use crate::protocol::{self, Button, LinkCapabilities};
use crate::screen::codec::encode_argb;
use crate::screen::ScreenSize;

const PIPE_CAPACITY: usize = 256 * 1024;
const MENU: [&str; 6] = ["Receive", "Transmit", "Capture", "Replay", "Scanner", "Settings"];

const BACKGROUND: u32 = 0xFF000000;
const TITLE_BAR: u32 = 0xFF0000AA;
const ROW: u32 = 0xFF555555;
const ROW_SELECTED: u32 = 0xFFFFAA00;
const ROW_OPENED: u32 = 0xFF00AA00;
const VALUE_BAR: u32 = 0xFF00FFFF;
const TEXT_BLOCK: u32 = 0xFFFFFFFF;
const TOUCH_MARK: u32 = 0xFFFF0000;

#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    pub size: ScreenSize,
    pub capabilities: LinkCapabilities,
    /// Older firmware answers `linkcaps` with `error`.
    pub linkcaps_supported: bool,
    /// Answer every frame request with `error`.
    pub reject_frames: bool,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            size: ScreenSize::H2_PORTRAIT,
            capabilities: LinkCapabilities {
                button_fast: true,
                touch_fast: true,
                frame_half: true,
            },
            linkcaps_supported: true,
            reject_frames: false,
        }
    }
}

/// What the emulated radio has been told so far.
#[derive(Debug, Default)]
struct RadioState {
    selected: usize,
    opened: bool,
    value: i32,
    touch: Option<(u32, u32)>,
    typed: String,
    commands: Vec<String>,
}

/// Shared view of a running emulator, for tests and logging.
#[derive(Clone, Default)]
pub struct EmulatorHandle {
    state: Arc<Mutex<RadioState>>,
}

impl EmulatorHandle {
    /// Every non-empty command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    pub fn typed_text(&self) -> String {
        self.state
            .lock()
            .map(|s| s.typed.clone())
            .unwrap_or_default()
    }

    pub fn encoder_value(&self) -> i32 {
        self.state.lock().map(|s| s.value).unwrap_or_default()
    }
}

/// Start an emulator task; returns the host end of the pipe.
pub fn spawn(options: EmulatorOptions) -> (DuplexStream, EmulatorHandle) {
    let (host, radio) = tokio::io::duplex(PIPE_CAPACITY);
    let handle = EmulatorHandle::default();
    let task_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = serve(radio, options, task_handle).await {
            debug!("emulator stopped: {}", e);
        }
    });
    (host, handle)
}

async fn serve(
    radio: DuplexStream,
    options: EmulatorOptions,
    handle: EmulatorHandle,
) -> std::io::Result<()> {
    let (reader, mut writer) = tokio::io::split(radio);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        let reply = {
            let mut state = match handle.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.commands.push(command.to_string());
            respond(command, &options, &mut state)
        };
        let mut out = String::new();
        for row in reply.body {
            out.push_str(&row);
            out.push_str(protocol::LINE_END);
        }
        out.push_str(if reply.accepted {
            protocol::OK
        } else {
            protocol::ERROR
        });
        out.push_str(protocol::LINE_END);
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

struct Reply {
    body: Vec<String>,
    accepted: bool,
}

impl Reply {
    fn ok(body: Vec<String>) -> Self {
        Self {
            body,
            accepted: true,
        }
    }

    fn error() -> Self {
        Self {
            body: Vec::new(),
            accepted: false,
        }
    }
}

fn respond(command: &str, options: &EmulatorOptions, state: &mut RadioState) -> Reply {
    let caps = options.capabilities;
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        (protocol::CMD_GETRES, []) => Reply::ok(vec![options.size.to_string()]),
        (protocol::CMD_LINKCAPS, []) if options.linkcaps_supported => Reply::ok(caps.to_lines()),
        (protocol::CMD_FRAME, []) if !options.reject_frames => {
            Reply::ok(encode_rows(&render(options.size, state), options.size, 1))
        }
        (protocol::CMD_FRAME_HALF, []) if caps.frame_half && !options.reject_frames => {
            Reply::ok(encode_rows(&render(options.size, state), options.size, 2))
        }
        ("button", [code]) => press(code, state),
        ("button_fast", [code]) if caps.button_fast => press(code, state),
        ("touch", [x, y]) => touch(x, y, options.size, state),
        ("touch_fast", [x, y]) if caps.touch_fast => touch(x, y, options.size, state),
        ("keyboard", [payload]) => match hex::decode(payload) {
            Ok(bytes) => {
                for byte in bytes {
                    match byte {
                        8 => {
                            state.typed.pop();
                        }
                        32..=126 => state.typed.push(char::from(byte)),
                        _ => {}
                    }
                }
                Reply::ok(Vec::new())
            }
            Err(_) => Reply::error(),
        },
        _ => Reply::error(),
    }
}

fn press(code: &str, state: &mut RadioState) -> Reply {
    let Some(button) = code.parse().ok().and_then(Button::from_code) else {
        return Reply::error();
    };
    match button {
        Button::Up => state.selected = (state.selected + MENU.len() - 1) % MENU.len(),
        Button::Down => state.selected = (state.selected + 1) % MENU.len(),
        Button::Left | Button::EncoderCcw => state.value -= 1,
        Button::Right | Button::EncoderCw => state.value += 1,
        Button::Ok => state.opened = !state.opened,
    }
    Reply::ok(Vec::new())
}

fn touch(x: &str, y: &str, size: ScreenSize, state: &mut RadioState) -> Reply {
    let (Ok(x), Ok(y)) = (x.parse::<u32>(), y.parse::<u32>()) else {
        return Reply::error();
    };
    if x >= size.width() || y >= size.height() {
        return Reply::error();
    }
    state.touch = Some((x, y));
    let layout = Layout::new(size);
    if let Some(row) = layout.row_at(y) {
        state.selected = row;
    }
    Reply::ok(Vec::new())
}

/// Vertical arrangement of the menu screen.
struct Layout {
    title_height: u32,
    row_height: u32,
}

impl Layout {
    fn new(size: ScreenSize) -> Self {
        let title_height = (size.height() / 12).max(1);
        let row_height = ((size.height() - title_height) / (MENU.len() as u32 + 2)).max(1);
        Self {
            title_height,
            row_height,
        }
    }

    fn row_at(&self, y: u32) -> Option<usize> {
        let row = (y.checked_sub(self.title_height)? / self.row_height) as usize;
        (row < MENU.len()).then_some(row)
    }
}

fn render(size: ScreenSize, state: &RadioState) -> Vec<u32> {
    let (width, height) = (size.width(), size.height());
    let layout = Layout::new(size);
    let mut pixels = vec![BACKGROUND; size.pixel_count()];
    let mut fill = |x0: u32, y0: u32, x1: u32, y1: u32, color: u32| {
        for y in y0.min(height)..y1.min(height) {
            for x in x0.min(width)..x1.min(width) {
                pixels[(y * width + x) as usize] = color;
            }
        }
    };

    fill(0, 0, width, layout.title_height, TITLE_BAR);

    for (i, item) in MENU.iter().enumerate() {
        let top = layout.title_height + i as u32 * layout.row_height;
        let color = match (i == state.selected, state.opened) {
            (true, true) => ROW_OPENED,
            (true, false) => ROW_SELECTED,
            _ => ROW,
        };
        // Label length stands in for text.
        let label_width = (item.len() as u32 * width / 16).min(width);
        fill(2, top + 2, label_width, top + layout.row_height - 1, color);
    }

    let bar_top = layout.title_height + MENU.len() as u32 * layout.row_height + 2;
    let bar_width = (state.value.rem_euclid(32) as u32 * width) / 32;
    fill(0, bar_top, bar_width, bar_top + layout.row_height / 2, VALUE_BAR);

    let text_top = bar_top + layout.row_height / 2 + 2;
    for i in 0..state.typed.len() as u32 {
        let left = 2 + i * 6;
        fill(left, text_top, left + 4, text_top + 6, TEXT_BLOCK);
    }

    if let Some((tx, ty)) = state.touch {
        fill(tx.saturating_sub(3), ty, tx + 4, ty + 1, TOUCH_MARK);
        fill(tx, ty.saturating_sub(3), tx + 1, ty + 4, TOUCH_MARK);
    }
    pixels
}

/// Encode `pixels` as shell rows, keeping every `step`-th pixel and row.
fn encode_rows(pixels: &[u32], size: ScreenSize, step: usize) -> Vec<String> {
    let width = size.width() as usize;
    let (out_width, out_height) = if step == 1 {
        (width, size.height() as usize)
    } else {
        size.half()
    };
    (0..out_height)
        .map(|row| {
            let y = (row * step).min(size.height() as usize - 1);
            (0..out_width)
                .map(|col| encode_argb(pixels[y * width + (col * step).min(width - 1)]))
                .collect()
        })
        .collect()
}

/// A single emulated radio, listed like a real USB device.
pub struct DemoDeviceProvider {
    options: EmulatorOptions,
    attached: AtomicBool,
    last: Mutex<Option<EmulatorHandle>>,
}

impl DemoDeviceProvider {
    pub const DEVICE_ID: &'static str = "demo";

    pub fn new(options: EmulatorOptions) -> Self {
        Self {
            options,
            attached: AtomicBool::new(true),
            last: Mutex::new(None),
        }
    }

    /// Simulate plugging or unplugging the radio.
    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    /// The emulator behind the most recent `open`.
    pub fn last_handle(&self) -> Option<EmulatorHandle> {
        self.last.lock().ok().and_then(|h| h.clone())
    }
}

impl DeviceProvider for DemoDeviceProvider {
    fn list(&self) -> Vec<DeviceInfo> {
        if !self.attached.load(Ordering::SeqCst) {
            return Vec::new();
        }
        vec![DeviceInfo {
            id: Self::DEVICE_ID.to_string(),
            title: "USB 1d50:6018".to_string(),
            subtitle: "HackRF One + PortaPack H2 (demo)".to_string(),
            has_permission: true,
        }]
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn LinkStream>, LinkError> {
        if !self.attached.load(Ordering::SeqCst) || device.id != Self::DEVICE_ID {
            return Err(LinkError::DeviceGone(device.id.clone()));
        }
        info!("starting firmware emulator ({})", self.options.size);
        let (stream, handle) = spawn(self.options.clone());
        if let Ok(mut last) = self.last.lock() {
            *last = Some(handle);
        }
        Ok(Box::new(stream))
    }
}
