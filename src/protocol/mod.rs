use serde::{Deserialize, Serialize};

/// Line terminator the shell expects after every command.
pub const LINE_END: &str = "\r\n";
/// Response terminator for an accepted command
pub const OK: &str = "ok";
/// Response terminator for a rejected command
pub const ERROR: &str = "error";

pub const CMD_GETRES: &str = "getres";
pub const CMD_LINKCAPS: &str = "linkcaps";
pub const CMD_FRAME: &str = "screenframeshort";
pub const CMD_FRAME_HALF: &str = "screenframeshort2";

/// Hardware buttons as numbered by the firmware's `button` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    Right,
    Left,
    Down,
    Up,
    Ok,
    EncoderCcw,
    EncoderCw,
}

impl Button {
    pub fn code(&self) -> u8 {
        match self {
            Button::Right => 1,
            Button::Left => 2,
            Button::Down => 3,
            Button::Up => 4,
            Button::Ok => 5,
            Button::EncoderCcw => 7,
            Button::EncoderCw => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Button::Right,
            2 => Button::Left,
            3 => Button::Down,
            4 => Button::Up,
            5 => Button::Ok,
            7 => Button::EncoderCcw,
            8 => Button::EncoderCw,
            _ => return None,
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Button::Right => "RIGHT",
            Button::Left => "LEFT",
            Button::Down => "DOWN",
            Button::Up => "UP",
            Button::Ok => "OK",
            Button::EncoderCcw => "ENC -",
            Button::EncoderCw => "ENC +",
        }
    }
}

pub fn button_command(code: u8) -> String {
    format!("button {}", code)
}

pub fn button_fast_command(code: u8) -> String {
    format!("button_fast {}", code)
}

pub fn touch_command(x: u32, y: u32) -> String {
    format!("touch {} {}", x, y)
}

pub fn touch_fast_command(x: u32, y: u32) -> String {
    format!("touch_fast {} {}", x, y)
}

pub fn keyboard_command(hex_payload: &str) -> String {
    format!("keyboard {}", hex_payload)
}

/// Low-latency command variants advertised by `linkcaps`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCapabilities {
    pub button_fast: bool,
    pub touch_fast: bool,
    pub frame_half: bool,
}

impl LinkCapabilities {
    pub fn turbo_enabled(&self) -> bool {
        self.button_fast || self.touch_fast || self.frame_half
    }

    /// Parse `key=value` lines; only a value of `1` enables a feature.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut caps = LinkCapabilities::default();
        for line in lines {
            let cleaned = line.as_ref().trim().to_lowercase();
            let Some((key, value)) = cleaned.split_once('=') else {
                continue;
            };
            let enabled = value.trim() == "1";
            match key.trim() {
                "button_fast" => caps.button_fast = enabled,
                "touch_fast" => caps.touch_fast = enabled,
                "screenframeshort2" => caps.frame_half = enabled,
                _ => {}
            }
        }
        caps
    }

    /// The `key=value` lines a firmware advertising these capabilities prints.
    pub fn to_lines(&self) -> Vec<String> {
        vec![
            format!("button_fast={}", self.button_fast as u8),
            format!("touch_fast={}", self.touch_fast as u8),
            format!("screenframeshort2={}", self.frame_half as u8),
        ]
    }
}
