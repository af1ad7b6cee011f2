//! Short-frame codec for the Mayhem shell.
//!
//! The firmware streams its LCD as text: one printable character per pixel,
//! `' ' + (r << 4 | g << 2 | b)` with two bits per channel. A frame response is
//! one line per row. Lines shorter than the row width are partial output or
//! shell noise and are skipped rather than rejected.

use thiserror::Error;

use super::ScreenSize;

const ASCII_OFFSET: u32 = 32;
const MAX_ENCODED: u32 = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: expected {expected} rows with >={width} chars, got {usable}")]
    FrameTooShort {
        expected: usize,
        width: usize,
        usable: usize,
    },
}

/// Find the first `<w>x<h>` line with both sides positive.
pub fn parse_resolution<S: AsRef<str>>(lines: &[S]) -> Option<ScreenSize> {
    lines.iter().find_map(|line| {
        let cleaned = line.as_ref().trim();
        let (w, h) = cleaned.split_once('x')?;
        if w.is_empty() || h.is_empty() {
            return None;
        }
        let w: u32 = w.parse().ok()?;
        let h: u32 = h.parse().ok()?;
        ScreenSize::new(w, h)
    })
}

/// Decode one pixel character into opaque ARGB. Out-of-range codes clamp.
pub fn decode_rgb6(ch: char) -> u32 {
    let v = (ch as u32).saturating_sub(ASCII_OFFSET).min(MAX_ENCODED);
    let r = ((v >> 4) & 0x03) * 85;
    let g = ((v >> 2) & 0x03) * 85;
    let b = (v & 0x03) * 85;
    0xFF00_0000 | (r << 16) | (g << 8) | b
}

/// Decode a full-resolution `screenframeshort` response.
pub fn decode_short_frame<S: AsRef<str>>(
    lines: &[S],
    width: usize,
    height: usize,
) -> Result<Vec<u32>, DecodeError> {
    assert!(width > 0, "width must be > 0");
    assert!(height > 0, "height must be > 0");
    decode_rows(lines, width, height)
}

/// Decode a `screenframeshort2` response (half width, half height) and
/// upsample it 2x with nearest-neighbour back to `width x height`.
pub fn decode_short_frame_half<S: AsRef<str>>(
    lines: &[S],
    width: usize,
    height: usize,
) -> Result<Vec<u32>, DecodeError> {
    assert!(width > 0, "width must be > 0");
    assert!(height > 0, "height must be > 0");

    let half_width = (width / 2).max(1);
    let half_height = (height / 2).max(1);
    let sampled = decode_rows(lines, half_width, half_height)?;

    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        let src_row = (y / 2).min(half_height - 1) * half_width;
        for x in 0..width {
            let sx = (x / 2).min(half_width - 1);
            pixels.push(sampled[src_row + sx]);
        }
    }
    Ok(pixels)
}

/// Encode one 2-bit-per-channel colour as the firmware would.
pub fn encode_rgb6(r: u8, g: u8, b: u8) -> char {
    let v = ((r as u32 & 0x03) << 4) | ((g as u32 & 0x03) << 2) | (b as u32 & 0x03);
    char::from_u32(v + ASCII_OFFSET).unwrap_or(' ')
}

/// Quantize an ARGB pixel down to the firmware's 6-bit palette.
pub fn encode_argb(pixel: u32) -> char {
    let r = ((pixel >> 16) & 0xFF) as u8 / 64;
    let g = ((pixel >> 8) & 0xFF) as u8 / 64;
    let b = (pixel & 0xFF) as u8 / 64;
    encode_rgb6(r, g, b)
}

fn decode_rows<S: AsRef<str>>(
    lines: &[S],
    width: usize,
    height: usize,
) -> Result<Vec<u32>, DecodeError> {
    let usable: Vec<&str> = lines
        .iter()
        .map(|l| l.as_ref())
        .filter(|l| l.chars().count() >= width)
        .collect();
    if usable.len() < height {
        return Err(DecodeError::FrameTooShort {
            expected: height,
            width,
            usable: usable.len(),
        });
    }

    let mut pixels = Vec::with_capacity(width * height);
    for row in usable.iter().take(height) {
        pixels.extend(row.chars().take(width).map(decode_rgb6));
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(r: u8, g: u8, b: u8) -> char {
        encode_rgb6(r, g, b)
    }

    #[test]
    fn test_parse_resolution_skips_noise() {
        let size = parse_resolution(&["noise", "240x320"]).unwrap();
        assert_eq!(size.width(), 240);
        assert_eq!(size.height(), 320);
    }

    #[test]
    fn test_parse_resolution_rejects_edge_separators() {
        assert_eq!(parse_resolution(&["x320", "240x"]), None);
        assert_eq!(parse_resolution(&["0x320", "-5x10", "axb"]), None);
        assert_eq!(parse_resolution::<&str>(&[]), None);
    }

    #[test]
    fn test_parse_resolution_trims_whitespace() {
        let size = parse_resolution(&["  320x240\t"]).unwrap();
        assert_eq!(size, ScreenSize::H2_LANDSCAPE);
    }

    #[test]
    fn test_decode_short_frame_maps_colors() {
        let lines = vec![
            format!("{}{}", enc(0, 0, 0), enc(3, 0, 0)),
            format!("{}{}", enc(0, 3, 0), enc(0, 0, 3)),
        ];
        let pixels = decode_short_frame(&lines, 2, 2).unwrap();
        assert_eq!(pixels, vec![0xFF000000, 0xFFFF0000, 0xFF00FF00, 0xFF0000FF]);
    }

    #[test]
    fn test_decode_short_frame_drops_partial_lines() {
        let full = enc(3, 3, 3).to_string().repeat(3);
        let lines = vec!["ch".to_string(), full.clone(), "x".to_string(), full];
        let pixels = decode_short_frame(&lines, 3, 2).unwrap();
        assert!(pixels.iter().all(|&p| p == 0xFFFFFFFF));
    }

    #[test]
    fn test_decode_short_frame_too_short() {
        let lines = vec!["   ".to_string(), "  ".to_string()];
        let err = decode_short_frame(&lines, 3, 2).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FrameTooShort {
                expected: 2,
                width: 3,
                usable: 1
            }
        );
    }

    #[test]
    #[should_panic(expected = "width must be > 0")]
    fn test_decode_rejects_zero_width() {
        let _ = decode_short_frame(&["abc"], 0, 1);
    }

    #[test]
    fn test_decode_half_upsamples_quadrants() {
        let a = enc(3, 0, 0);
        let b = enc(0, 3, 0);
        let c = enc(0, 0, 3);
        let d = enc(3, 3, 3);
        let lines = vec![format!("{a}{b}"), format!("{c}{d}")];
        let pixels = decode_short_frame_half(&lines, 4, 4).unwrap();
        assert_eq!(pixels.len(), 16);
        let expect = |x: usize, y: usize| match (x / 2, y / 2) {
            (0, 0) => decode_rgb6(a),
            (1, 0) => decode_rgb6(b),
            (0, 1) => decode_rgb6(c),
            _ => decode_rgb6(d),
        };
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(pixels[y * 4 + x], expect(x, y), "pixel {x},{y}");
            }
        }
    }

    #[test]
    fn test_decode_half_odd_dimensions_clamp_source() {
        // 5x3 -> 2x1 source; the last column and row repeat the edge sample
        let lines = vec![format!("{}{}", enc(1, 0, 0), enc(0, 1, 0))];
        let pixels = decode_short_frame_half(&lines, 5, 3).unwrap();
        assert_eq!(pixels.len(), 15);
        assert_eq!(pixels[4], decode_rgb6(enc(0, 1, 0)));
        assert_eq!(pixels[14], decode_rgb6(enc(0, 1, 0)));
        assert_eq!(pixels[10], decode_rgb6(enc(1, 0, 0)));
    }

    #[test]
    fn test_decode_rgb6_clamps_out_of_range() {
        assert_eq!(decode_rgb6('\u{1}'), 0xFF000000);
        assert_eq!(decode_rgb6('~'), 0xFFFFFFFF);
        assert_eq!(decode_rgb6('\u{FF}'), 0xFFFFFFFF);
    }

    #[test]
    fn test_encode_argb_quantizes() {
        assert_eq!(decode_rgb6(encode_argb(0xFF20252B)), 0xFF000000);
        assert_eq!(decode_rgb6(encode_argb(0xFFFF8000)), 0xFFFFAA00);
    }

    proptest! {
        #[test]
        fn prop_decode_rgb6_channels(r in 0u8..4, g in 0u8..4, b in 0u8..4) {
            let code = 32 + ((r as u32) << 4 | (g as u32) << 2 | b as u32);
            let pixel = decode_rgb6(char::from_u32(code).unwrap());
            prop_assert_eq!(pixel >> 24, 0xFF);
            prop_assert_eq!((pixel >> 16) & 0xFF, r as u32 * 85);
            prop_assert_eq!((pixel >> 8) & 0xFF, g as u32 * 85);
            prop_assert_eq!(pixel & 0xFF, b as u32 * 85);
        }
    }
}
