//! Timed Text Models
//!
//! Defines the editable transcript (`TimedText`) and the values the layout
//! engine derives from it (`TimedWord`, `Phrase`).
//!
//! # Overview
//!
//! A transcript is an ordered list of segments. Each segment may carry
//! engine-native word timings; when it does not, the layout engine allocates
//! them from the segment span.

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, TimeSec};

// =============================================================================
// Transcript
// =============================================================================

/// A single recognised word
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub text: String,
    pub start: TimeSec,
    pub end: TimeSec,
    /// Recogniser confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,
}

impl Word {
    pub fn new(text: &str, start: TimeSec, end: TimeSec) -> Self {
        Self {
            text: text.to_string(),
            start,
            end,
            confidence: 0.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// A contiguous span of speech
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(default)]
    pub id: u32,
    pub text: String,
    pub start: TimeSec,
    pub end: TimeSec,
    #[serde(default)]
    pub words: Vec<Word>,
}

impl Segment {
    /// Creates a segment without word timings
    pub fn new(id: u32, start: TimeSec, end: TimeSec, text: &str) -> Self {
        Self {
            id,
            text: text.to_string(),
            start,
            end,
            words: Vec::new(),
        }
    }

    pub fn with_words(mut self, words: Vec<Word>) -> Self {
        self.words = words;
        self
    }

    /// Gets segment duration in seconds
    pub fn duration(&self) -> TimeSec {
        self.end - self.start
    }
}

/// Editable transcript with segment and word timing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl TimedText {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            language: None,
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Joined segment text, one segment per line
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// End time of the last segment
    pub fn duration(&self) -> TimeSec {
        self.segments.iter().map(|s| s.end).fold(0.0, f64::max)
    }

    /// Checks timing invariants.
    ///
    /// Segments and words need finite, non-negative `start <= end`; words are
    /// time ordered without overlap; confidence is within [0, 1].
    pub fn validate(&self) -> CoreResult<()> {
        for (index, segment) in self.segments.iter().enumerate() {
            check_span("segment", index, segment.start, segment.end)?;

            let mut previous_end = f64::NEG_INFINITY;
            for (word_index, word) in segment.words.iter().enumerate() {
                check_span("word", word_index, word.start, word.end)?;
                if word.start < previous_end {
                    return Err(CoreError::Validation(format!(
                        "Word {word_index} of segment {index} overlaps the previous word"
                    )));
                }
                if !(0.0..=1.0).contains(&word.confidence) {
                    return Err(CoreError::Validation(format!(
                        "Word {word_index} of segment {index} has confidence {} outside [0, 1]",
                        word.confidence
                    )));
                }
                previous_end = word.end;
            }
        }
        Ok(())
    }

    /// Parses and validates a JSON payload
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let parsed: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid timed text: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn check_span(kind: &str, index: usize, start: TimeSec, end: TimeSec) -> CoreResult<()> {
    if !start.is_finite() || !end.is_finite() {
        return Err(CoreError::Validation(format!(
            "{kind} {index} has a non-finite time"
        )));
    }
    if start < 0.0 {
        return Err(CoreError::Validation(format!(
            "{kind} {index} starts before zero"
        )));
    }
    if start > end {
        return Err(CoreError::Validation(format!(
            "{kind} {index} starts after it ends ({start} > {end})"
        )));
    }
    Ok(())
}

// =============================================================================
// Layout Output
// =============================================================================

/// A word with its on-screen interval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedWord {
    pub text: String,
    pub start: TimeSec,
    pub end: TimeSec,
}

impl TimedWord {
    pub fn new(text: &str, start: TimeSec, end: TimeSec) -> Self {
        Self {
            text: text.to_string(),
            start,
            end,
        }
    }
}

/// Window of consecutive words shown together
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phrase {
    pub words: Vec<TimedWord>,
    pub start: TimeSec,
    pub end: TimeSec,
}

impl Phrase {
    /// Builds a phrase spanning its words; `None` for an empty window
    pub fn from_words(words: Vec<TimedWord>) -> Option<Self> {
        let start = words.first()?.start;
        let end = words.last()?.end;
        Some(Self { words, start, end })
    }

    /// Words joined by single spaces
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// =============================================================================
// Colors
// =============================================================================

/// RGBA color value (0-255 for each component)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const fn white() -> Self {
        Self::rgb(255, 255, 255)
    }

    pub const fn black() -> Self {
        Self::rgb(0, 0, 0)
    }

    pub const fn red() -> Self {
        Self::rgb(255, 0, 0)
    }

    /// Converts to ASS/SSA color format (&HAABBGGRR, alpha inverted)
    pub fn to_ass_color(&self) -> String {
        format!(
            "&H{:02X}{:02X}{:02X}{:02X}",
            255 - self.a,
            self.b,
            self.g,
            self.r
        )
    }

    /// Converts to an FFmpeg color expression (`0xRRGGBB@opacity`)
    pub fn to_ffmpeg_color(&self) -> String {
        let opacity = self.a as f64 / 255.0;
        format!(
            "0x{:02X}{:02X}{:02X}@{:.2}",
            self.r, self.g, self.b, opacity
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::white()
    }
}
