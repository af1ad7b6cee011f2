use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::path::PathBuf;

use crate::input::NavAction;

use super::types::{Intent, DIAL_NOTCH};

/// Map a key in remote mode to what it asks for.
pub fn key_intent(key: KeyEvent) -> Option<Intent> {
    let intent = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Intent::Quit,
        KeyCode::Char('q') | KeyCode::Esc => Intent::Quit,
        KeyCode::Up => Intent::Press(NavAction::Up),
        KeyCode::Down => Intent::Press(NavAction::Down),
        KeyCode::Left => Intent::Press(NavAction::Left),
        KeyCode::Right => Intent::Press(NavAction::Right),
        KeyCode::Enter => Intent::Press(NavAction::Ok),
        KeyCode::Char('[') => Intent::Dial(-DIAL_NOTCH),
        KeyCode::Char(']') => Intent::Dial(DIAL_NOTCH),
        KeyCode::Char('c') => Intent::Connect,
        KeyCode::Char('d') => Intent::Disconnect,
        KeyCode::Char('n') => Intent::NextDevice,
        KeyCode::Char('p') => Intent::CycleProfile,
        KeyCode::Char('f') => Intent::ToggleFine,
        KeyCode::Char('l') => Intent::ToggleTouchLock,
        KeyCode::Char('k') => Intent::OpenKeyboard,
        _ => return None,
    };
    Some(intent)
}

/// Format a duration smartly: "1:23" for under an hour, "2:45:03" for hours, "1d 3:20:15" for days
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_secs = duration.num_seconds();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if days > 0 {
        format!("{}d {}:{:02}:{:02}", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

/// Uptime of a `std` duration as shown in the header.
pub fn format_uptime(uptime: std::time::Duration) -> String {
    chrono::Duration::from_std(uptime)
        .map(format_duration)
        .unwrap_or_else(|_| "-".to_string())
}

/// Expand ~ in paths to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            let mut buf = PathBuf::from(home);
            buf.push(stripped);
            return buf;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_key_intents() {
        assert_eq!(key_intent(key(KeyCode::Enter)), Some(Intent::Press(NavAction::Ok)));
        assert_eq!(key_intent(key(KeyCode::Char(']'))), Some(Intent::Dial(DIAL_NOTCH)));
        assert_eq!(key_intent(key(KeyCode::Char('c'))), Some(Intent::Connect));
        assert_eq!(
            key_intent(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Intent::Quit)
        );
        assert_eq!(key_intent(key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(83)), "1:23");
        assert_eq!(format_duration(chrono::Duration::seconds(9903)), "2:45:03");
        assert_eq!(format_duration(chrono::Duration::seconds(98415)), "1d 3:20:15");
        assert_eq!(format_uptime(std::time::Duration::from_secs(5)), "0:05");
    }

    #[test]
    fn test_expand_path_passthrough() {
        assert_eq!(expand_path("/tmp/x.toml"), PathBuf::from("/tmp/x.toml"));
    }
}
