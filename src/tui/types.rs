use crate::input::NavAction;

/// Radians of dial rotation per `[`/`]` key or wheel notch.
pub const DIAL_NOTCH: f32 = 0.3;

/// What the keyboard is currently typing into.
#[derive(Clone, Debug, PartialEq)]
pub enum InputMode {
    /// Keys drive the radio.
    Remote,
    /// Collecting a frequency for the firmware keyboard.
    Keyboard {
        buffer: String,
        /// Press OK after typing.
        apply_after: bool,
    },
}

/// Something a key asks the session to do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Intent {
    Press(NavAction),
    Dial(f32),
    Connect,
    Disconnect,
    NextDevice,
    CycleProfile,
    ToggleFine,
    ToggleTouchLock,
    OpenKeyboard,
    Quit,
}

/// Left button held on the mirrored screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DragState {
    pub start: (u16, u16),
    pub last_col: u16,
    pub moved: bool,
}

impl DragState {
    pub fn new(col: u16, row: u16) -> Self {
        Self {
            start: (col, row),
            last_col: col,
            moved: false,
        }
    }
}
