//! Remote control for PortaPack radios running the Mayhem firmware.
//!
//! The radio exposes a line-oriented shell over USB CDC serial. [`link`]
//! speaks that shell, [`screen::codec`] decodes its text-encoded frames and
//! [`session`] keeps one link alive while streaming the screen and
//! forwarding input.

pub mod cli;
pub mod config;
pub mod input;
pub mod link;
pub mod protocol;
pub mod screen;
pub mod session;
pub mod tui;
