//! SubRip (SRT) Import and Export
//!
//! Serialises a transcript as SRT for download and for the `subtitles`
//! burn filter, and parses caller-edited SRT back into a transcript.
//!
//! Parsing is best-effort: blocks that do not look like captions are skipped,
//! never reported as errors.
//!
//! ```text
//! 1
//! 00:00:01,000 --> 00:00:04,000
//! First caption text
//!
//! 2
//! 00:00:05,500 --> 00:00:08,000
//! Second caption text
//! ```

use std::sync::OnceLock;

use regex::Regex;

use super::models::{Segment, TimedText};
use crate::core::TimeSec;

/// Absorbs binary float error so that `1.001` prints as `,001`, not `,000`
const FLOOR_EPSILON: f64 = 1e-6;

fn time_range_regex() -> &'static Regex {
    static TIME_RANGE: OnceLock<Regex> = OnceLock::new();
    TIME_RANGE.get_or_init(|| {
        Regex::new(r"^\s*(\d{2,}:\d{2}:\d{2},\d{3})\s*-->\s*(\d{2,}:\d{2}:\d{2},\d{3})")
            .expect("static SRT time range pattern")
    })
}

// =============================================================================
// Timestamps
// =============================================================================

/// Formats seconds as `HH:MM:SS,mmm`, flooring to the millisecond.
///
/// Negative and non-finite input clamps to zero.
pub fn seconds_to_srt_time(seconds: TimeSec) -> String {
    let total_ms = floor_units(seconds, 1000.0);
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    format!("{hours:02}:{mins:02}:{secs:02},{ms:03}")
}

/// Parses `HH:MM:SS,mmm` into seconds; hours may have more than two digits
pub fn srt_time_to_seconds(timestamp: &str) -> Option<TimeSec> {
    let (clock, millis) = timestamp.trim().split_once(',')?;
    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;
    if millis >= 1000 {
        return None;
    }

    Some((hours * 3600 + minutes * 60 + seconds) as f64 + millis as f64 / 1000.0)
}

pub(crate) fn floor_units(seconds: TimeSec, units_per_second: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * units_per_second + FLOOR_EPSILON).floor() as u64
}

// =============================================================================
// Export
// =============================================================================

/// Exports one SRT block per segment
pub fn export_srt(timed_text: &TimedText) -> String {
    let mut output = String::new();

    for (index, segment) in timed_text.segments.iter().enumerate() {
        output.push_str(&format!("{}\n", index + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            seconds_to_srt_time(segment.start),
            seconds_to_srt_time(segment.end)
        ));
        output.push_str(segment.text.trim());
        output.push_str("\n\n");
    }

    output
}

// =============================================================================
// Import
// =============================================================================

/// Parses SRT content into a transcript without word timings.
///
/// A block needs an index line, a time range line and at least one text
/// line; multi-line text is joined with single spaces.
pub fn parse_srt(content: &str) -> TimedText {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut segments = Vec::new();

    for block in split_blocks(&normalized) {
        let lines: Vec<&str> = block.lines().map(str::trim).collect();
        if lines.len() < 3 {
            tracing::debug!("Skipping SRT block with {} lines", lines.len());
            continue;
        }

        let Some(captures) = time_range_regex().captures(lines[1]) else {
            tracing::debug!("Skipping SRT block without a time range: {:?}", lines[1]);
            continue;
        };

        let (Some(start), Some(end)) = (
            srt_time_to_seconds(&captures[1]),
            srt_time_to_seconds(&captures[2]),
        ) else {
            tracing::debug!("Skipping SRT block with an invalid timestamp: {:?}", lines[1]);
            continue;
        };

        let text = lines[2..]
            .iter()
            .filter(|l| !l.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        segments.push(Segment::new(segments.len() as u32, start, end, &text));
    }

    TimedText::new(segments)
}

/// Splits on runs of blank (or whitespace-only) lines
fn split_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    blocks
}
