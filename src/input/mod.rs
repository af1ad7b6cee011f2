pub mod encoder;
pub mod text;

use crate::protocol::Button;

/// Discrete presses the presentation layer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavAction {
    Up,
    Down,
    Left,
    Right,
    Ok,
}

impl NavAction {
    pub fn button(&self) -> Button {
        match self {
            NavAction::Up => Button::Up,
            NavAction::Down => Button::Down,
            NavAction::Left => Button::Left,
            NavAction::Right => Button::Right,
            NavAction::Ok => Button::Ok,
        }
    }
}

/// Source of a continuous encoder gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// Horizontal drag, measured in pixels.
    Drag,
    /// Rotary dial, measured in radians.
    Dial,
}
