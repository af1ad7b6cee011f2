//! Frequency entry for the firmware's `keyboard <hex>` injection command.

pub const MAX_INPUT_LENGTH: usize = 24;

const BACKSPACE: u8 = 0x08;

/// Keep digits and the first `.`, capped at [`MAX_INPUT_LENGTH`].
pub fn sanitize(raw: &str) -> String {
    let mut dot_used = false;
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .take(MAX_INPUT_LENGTH)
        .filter(|c| {
            if *c != '.' {
                return true;
            }
            !std::mem::replace(&mut dot_used, true)
        })
        .collect()
}

/// Hex payload (uppercase, two digits per byte) for `keyboard`.
///
/// Only printable ASCII and backspace survive; everything else is dropped.
pub fn to_keyboard_payload(text: &str) -> String {
    let bytes: Vec<u8> = text
        .chars()
        .take(MAX_INPUT_LENGTH)
        .filter(|c| c.is_ascii())
        .map(|c| c as u8)
        .filter(|&b| (32..=126).contains(&b) || b == BACKSPACE)
        .collect();
    hex::encode_upper(bytes)
}
