//! Terminal rendering of mirrored frames using ratatui-image.
//!
//! Picks the best graphics protocol the terminal offers:
//! - Sixel (Windows Terminal, xterm, foot, WezTerm, etc.)
//! - Kitty graphics protocol (Kitty, WezTerm, Ghostty)
//! - iTerm2 inline images (iTerm2, WezTerm)
//! - Halfblocks fallback (any terminal with 24-bit color)

use image::{DynamicImage, Rgb, RgbImage};
use ratatui::layout::Rect;
use ratatui_image::picker::{Picker, ProtocolType};
use ratatui_image::protocol::StatefulProtocol;

use super::Frame;

/// Create a Picker by querying terminal capabilities.
///
/// If `force_protocol` is Some, skip detection and use the specified protocol.
/// Should be called BEFORE entering raw mode / alternate screen.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(proto_name) = force_protocol {
        let proto_type = match proto_name.to_lowercase().as_str() {
            "sixel" => ProtocolType::Sixel,
            "kitty" => ProtocolType::Kitty,
            "iterm2" | "iterm" => ProtocolType::Iterm2,
            "halfblocks" | "half" | "text" => ProtocolType::Halfblocks,
            _ => {
                tracing::warn!(protocol = proto_name, "unknown graphics protocol, auto-detecting");
                return auto_detect_picker();
            }
        };
        let mut picker = Picker::halfblocks();
        picker.set_protocol_type(proto_type);
        tracing::info!(?proto_type, "graphics protocol forced");
        return picker;
    }

    auto_detect_picker()
}

fn auto_detect_picker() -> Picker {
    match Picker::from_query_stdio() {
        Ok(picker) => {
            tracing::info!(protocol = ?picker.protocol_type(), "graphics protocol detected");
            picker
        }
        Err(e) => {
            tracing::debug!("terminal graphics query failed: {}", e);
            Picker::halfblocks()
        }
    }
}

/// Convert an ARGB frame into an RGB image (alpha is always opaque).
pub fn frame_to_image(frame: &Frame) -> RgbImage {
    let size = frame.size();
    RgbImage::from_fn(size.width(), size.height(), |x, y| {
        let p = frame.pixel(x, y).unwrap_or(0);
        Rgb([(p >> 16) as u8, (p >> 8) as u8, p as u8])
    })
}

/// Create a StatefulProtocol for rendering this frame with ratatui-image.
pub fn to_protocol(frame: &Frame, picker: &mut Picker) -> StatefulProtocol {
    picker.new_resize_protocol(DynamicImage::ImageRgb8(frame_to_image(frame)))
}

/// Largest rect inside `area` that keeps the frame's aspect ratio given the
/// terminal cell size in pixels. Centered horizontally, top-aligned.
pub fn fit_frame_rect(area: Rect, frame_w: u32, frame_h: u32, cell: (u16, u16)) -> Rect {
    if area.width == 0 || area.height == 0 || frame_w == 0 || frame_h == 0 {
        return Rect::new(area.x, area.y, 0, 0);
    }
    let (cell_w, cell_h) = (cell.0.max(1) as f64, cell.1.max(1) as f64);
    let avail_w = area.width as f64 * cell_w;
    let avail_h = area.height as f64 * cell_h;
    let scale = (avail_w / frame_w as f64).min(avail_h / frame_h as f64);
    let width = ((frame_w as f64 * scale / cell_w).floor() as u16).clamp(1, area.width);
    let height = ((frame_h as f64 * scale / cell_h).floor() as u16).clamp(1, area.height);
    let x = area.x + (area.width - width) / 2;
    Rect::new(x, area.y, width, height)
}

/// Map a terminal cell inside `rect` to a screen pixel coordinate.
pub fn cell_to_pixel(rect: Rect, col: u16, row: u16, frame_w: u32, frame_h: u32) -> Option<(u32, u32)> {
    if rect.width == 0 || rect.height == 0 {
        return None;
    }
    if col < rect.x || row < rect.y || col >= rect.x + rect.width || row >= rect.y + rect.height {
        return None;
    }
    // Sample the centre of the cell
    let fx = ((col - rect.x) as f64 + 0.5) / rect.width as f64;
    let fy = ((row - rect.y) as f64 + 0.5) / rect.height as f64;
    let x = ((fx * frame_w as f64) as u32).min(frame_w - 1);
    let y = ((fy * frame_h as f64) as u32).min(frame_h - 1);
    Some((x, y))
}
