//! Advanced SubStation Alpha (ASS) Export
//!
//! Produces a styled subtitle script for the `ass` burn filter. The plain
//! variant writes one dialogue line per segment; the highlight variant lays
//! the transcript out into phrases and, for every word, writes the neutral
//! phrase on layer 0 plus the active word in a boxed style on layer 1.

use serde::{Deserialize, Serialize};

use super::formats::floor_units;
use super::layout::{layout, LayoutOptions};
use super::models::{Color, TimedText};
use crate::core::{AnchorPosition, CoreResult, FrameSize, TimeSec};

/// Formats seconds as `H:MM:SS.cc`, flooring to the centisecond
pub fn seconds_to_ass_time(seconds: TimeSec) -> String {
    let total_cs = floor_units(seconds, 100.0);
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    format!("{hours}:{mins:02}:{secs:02}.{cs:02}")
}

// =============================================================================
// Styles
// =============================================================================

/// A named `[V4+ Styles]` entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssStyle {
    pub name: String,
    pub font_name: String,
    pub font_size: u32,
    pub primary_color: Color,
    pub outline_color: Color,
    pub back_color: Color,
    pub bold: bool,
    /// 1 = outline + shadow, 3 = opaque box
    pub border_style: u8,
    pub outline: f32,
    pub shadow: f32,
    /// Numpad alignment, 2 = bottom centre
    pub alignment: u8,
    pub margin_l: u32,
    pub margin_r: u32,
    pub margin_v: u32,
}

impl Default for AssStyle {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            font_name: "DejaVu Sans".to_string(),
            font_size: 48,
            primary_color: Color::white(),
            outline_color: Color::black(),
            back_color: Color::rgba(0, 0, 0, 128),
            bold: true,
            border_style: 1,
            outline: 2.0,
            shadow: 0.0,
            alignment: 2,
            margin_l: 10,
            margin_r: 10,
            margin_v: 10,
        }
    }
}

impl AssStyle {
    /// Bottom-centred style placed at `anchor` on `canvas`.
    ///
    /// Font size scales with the frame width (7%); the anchor becomes the
    /// vertical margin and a horizontal margin split around `x`.
    pub fn anchored(font_name: &str, canvas: FrameSize, anchor: AnchorPosition) -> Self {
        let width = canvas.width as f64;
        let x = anchor.x_pixels(canvas);

        Self {
            font_name: font_name.to_string(),
            font_size: ((width * 0.07) as u32).max(1),
            margin_l: (2.0 * x - width).max(0.0).round() as u32,
            margin_r: (width - 2.0 * x).max(0.0).round() as u32,
            margin_v: (canvas.height as f64 * anchor.y_percent / 100.0).round() as u32,
            ..Self::default()
        }
    }

    /// Boxed variant used for the active word
    pub fn highlight_of(base: &AssStyle, box_color: Color) -> Self {
        Self {
            name: "Highlight".to_string(),
            outline_color: box_color,
            back_color: box_color,
            border_style: 3,
            outline: 10.0,
            ..base.clone()
        }
    }

    fn to_line(&self) -> String {
        format!(
            "Style: {},{},{},{},{},{},{},{},0,0,0,100,100,0,0,{},{},{},{},{},{},{},1",
            self.name,
            self.font_name,
            self.font_size,
            self.primary_color.to_ass_color(),
            self.primary_color.to_ass_color(),
            self.outline_color.to_ass_color(),
            self.back_color.to_ass_color(),
            if self.bold { -1 } else { 0 },
            self.border_style,
            self.outline,
            self.shadow,
            self.alignment,
            self.margin_l,
            self.margin_r,
            self.margin_v,
        )
    }
}

// =============================================================================
// Document
// =============================================================================

/// One `Dialogue:` line
#[derive(Clone, Debug, PartialEq)]
pub struct AssEvent {
    pub layer: u32,
    pub start: TimeSec,
    pub end: TimeSec,
    pub style: String,
    pub text: String,
}

impl AssEvent {
    fn to_line(&self) -> String {
        format!(
            "Dialogue: {},{},{},{},,0,0,0,,{}",
            self.layer,
            seconds_to_ass_time(self.start),
            seconds_to_ass_time(self.end),
            self.style,
            escape_ass_text(&self.text)
        )
    }
}

/// Complete ASS script
#[derive(Clone, Debug, PartialEq)]
pub struct AssDocument {
    pub play_res: FrameSize,
    pub styles: Vec<AssStyle>,
    pub events: Vec<AssEvent>,
}

impl AssDocument {
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("[Script Info]\n");
        out.push_str("ScriptType: v4.00+\n");
        out.push_str("WrapStyle: 0\n");
        out.push_str("ScaledBorderAndShadow: yes\n");
        out.push_str(&format!("PlayResX: {}\n", self.play_res.width));
        out.push_str(&format!("PlayResY: {}\n\n", self.play_res.height));

        out.push_str("[V4+ Styles]\n");
        out.push_str(
            "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
             BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
             BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
        );
        for style in &self.styles {
            out.push_str(&style.to_line());
            out.push('\n');
        }
        out.push('\n');

        out.push_str("[Events]\n");
        out.push_str(
            "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        );
        for event in &self.events {
            out.push_str(&event.to_line());
            out.push('\n');
        }

        out
    }
}

/// Override blocks start with `{` and escapes such as `\N` start with a
/// backslash; both are replaced by look-alikes. Newlines become hard breaks.
fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "\u{FF3C}")
        .replace('{', "(")
        .replace('}', ")")
        .replace("\r\n", "\\N")
        .replace('\n', "\\N")
}

/// Exports a transcript as an ASS script.
///
/// With `highlight` set, words are laid out into phrases and each word gets a
/// neutral phrase line plus a boxed active-word line over its own interval.
pub fn export_ass(
    timed_text: &TimedText,
    style: &AssStyle,
    canvas: FrameSize,
    highlight: Option<(&LayoutOptions, Color)>,
) -> CoreResult<String> {
    let mut styles = vec![style.clone()];
    let mut events = Vec::new();

    match highlight {
        None => {
            for segment in &timed_text.segments {
                let text = segment.text.trim();
                if text.is_empty() {
                    continue;
                }
                events.push(AssEvent {
                    layer: 0,
                    start: segment.start,
                    end: segment.end,
                    style: style.name.clone(),
                    text: text.to_string(),
                });
            }
        }
        Some((options, box_color)) => {
            let active = AssStyle::highlight_of(style, box_color);
            // The phrase cap only bounds drawtext filter graphs
            let uncapped = LayoutOptions {
                max_phrases: usize::MAX,
                ..*options
            };
            for phrase in layout(timed_text, &uncapped)? {
                let phrase_text = phrase.text();
                for word in &phrase.words {
                    events.push(AssEvent {
                        layer: 0,
                        start: word.start,
                        end: word.end,
                        style: style.name.clone(),
                        text: phrase_text.clone(),
                    });
                    events.push(AssEvent {
                        layer: 1,
                        start: word.start,
                        end: word.end,
                        style: active.name.clone(),
                        text: word.text.clone(),
                    });
                }
            }
            styles.push(active);
        }
    }

    Ok(AssDocument {
        play_res: canvas,
        styles,
        events,
    }
    .render())
}
