pub mod codec;
pub mod viewer;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Screen dimensions of the radio's LCD in pixels. Both sides are always > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawScreenSize")]
pub struct ScreenSize {
    width: u32,
    height: u32,
}

impl ScreenSize {
    /// The H2 panel in its native portrait orientation.
    pub const H2_PORTRAIT: ScreenSize = ScreenSize {
        width: 240,
        height: 320,
    };
    pub const H2_LANDSCAPE: ScreenSize = ScreenSize {
        width: 320,
        height: 240,
    };

    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Dimensions of the half-resolution stream (`screenframeshort2`).
    pub fn half(&self) -> (usize, usize) {
        (
            (self.width as usize / 2).max(1),
            (self.height as usize / 2).max(1),
        )
    }
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self::H2_PORTRAIT
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Deserialize)]
struct RawScreenSize {
    width: u32,
    height: u32,
}

impl TryFrom<RawScreenSize> for ScreenSize {
    type Error = String;

    fn try_from(raw: RawScreenSize) -> Result<Self, Self::Error> {
        ScreenSize::new(raw.width, raw.height)
            .ok_or_else(|| format!("invalid screen size {}x{}", raw.width, raw.height))
    }
}

/// Either defer to the size reported by `getres` or force a known panel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenProfile {
    #[default]
    Auto,
    H2Portrait,
    H2Landscape,
}

impl ScreenProfile {
    pub const ALL: [ScreenProfile; 3] = [
        ScreenProfile::Auto,
        ScreenProfile::H2Portrait,
        ScreenProfile::H2Landscape,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ScreenProfile::Auto => "Auto (detected)",
            ScreenProfile::H2Portrait => "H2 240x320",
            ScreenProfile::H2Landscape => "H2 320x240",
        }
    }

    pub fn forced_size(&self) -> Option<ScreenSize> {
        match self {
            ScreenProfile::Auto => None,
            ScreenProfile::H2Portrait => Some(ScreenSize::H2_PORTRAIT),
            ScreenProfile::H2Landscape => Some(ScreenSize::H2_LANDSCAPE),
        }
    }

    /// Forced size wins over the detected one.
    pub fn resolve(&self, detected: ScreenSize) -> ScreenSize {
        self.forced_size().unwrap_or(detected)
    }

    pub fn next(&self) -> ScreenProfile {
        let idx = Self::ALL.iter().position(|p| p == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// One decoded screen image: `size.pixel_count()` opaque ARGB pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    size: ScreenSize,
    pixels: Vec<u32>,
}

impl Frame {
    pub fn new(size: ScreenSize, pixels: Vec<u32>) -> Self {
        assert_eq!(
            pixels.len(),
            size.pixel_count(),
            "frame buffer does not match {}",
            size
        );
        Self { size, pixels }
    }

    pub fn size(&self) -> ScreenSize {
        self.size
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.size.width as usize + x as usize)
            .copied()
    }
}
