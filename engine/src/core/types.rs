//! CaptionForge Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use serde::{Deserialize, Serialize};

use super::{CoreError, CoreResult};

// =============================================================================
// ID Types
// =============================================================================

/// Job unique identifier (ULID)
pub type JobId = String;

/// Queue task unique identifier (ULID)
pub type TaskId = String;

/// Opaque owner reference (account handling lives outside the pipeline)
pub type OwnerId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

// =============================================================================
// Geometry
// =============================================================================

/// Frame dimensions in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Requested output resolution for a burn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Resolution {
    /// Keep the source dimensions
    #[default]
    Original,
    /// Scale and letterbox to a fixed frame
    Fixed { width: u32, height: u32 },
}

impl Resolution {
    /// Returns the fixed frame, if any
    pub fn frame(&self) -> Option<FrameSize> {
        match self {
            Self::Original => None,
            Self::Fixed { width, height } => Some(FrameSize::new(*width, *height)),
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("original") {
            return Ok(Self::Original);
        }

        let (w, h) = trimmed
            .split_once(['x', 'X'])
            .ok_or_else(|| CoreError::Validation(format!("Invalid resolution: {trimmed}")))?;

        let width: u32 = w
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid resolution width: {w}")))?;
        let height: u32 = h
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid resolution height: {h}")))?;

        // libx264 needs even dimensions
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 || width > 7680 || height > 7680 {
            return Err(CoreError::Validation(format!(
                "Resolution out of range: {width}x{height}"
            )));
        }

        Ok(Self::Fixed { width, height })
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Fixed { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

/// Subtitle anchor position stored as percentages.
///
/// `x_percent` is measured from the left edge, `y_percent` from the bottom edge.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPosition {
    pub x_percent: f64,
    pub y_percent: f64,
}

impl Default for AnchorPosition {
    fn default() -> Self {
        Self {
            x_percent: 50.0,
            y_percent: 15.0,
        }
    }
}

impl AnchorPosition {
    /// Creates a validated anchor
    pub fn new(x_percent: f64, y_percent: f64) -> CoreResult<Self> {
        let anchor = Self {
            x_percent,
            y_percent,
        };
        anchor.validate()?;
        Ok(anchor)
    }

    /// Both coordinates must be finite and within 0-100
    pub fn validate(&self) -> CoreResult<()> {
        for (label, value) in [("x", self.x_percent), ("y", self.y_percent)] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(CoreError::Validation(format!(
                    "Anchor {label} must be between 0 and 100, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Horizontal anchor in pixels from the left edge
    pub fn x_pixels(&self, frame: FrameSize) -> f64 {
        frame.width as f64 * self.x_percent / 100.0
    }

    /// Vertical anchor in pixels from the top edge.
    ///
    /// The stored value is percent from the bottom, the directive origin is
    /// the top-left corner: `y = height * (100 - y_percent) / 100`.
    pub fn y_pixels(&self, frame: FrameSize) -> f64 {
        frame.height as f64 * (100.0 - self.y_percent) / 100.0
    }
}
