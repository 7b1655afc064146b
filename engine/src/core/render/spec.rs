//! Render specification and builder.
//!
//! A [`RenderSpec`] is the complete, declarative description of one burn:
//! input, output, the caption overlay, output geometry and encoder quality.
//! It is derived purely from its inputs and turned into FFmpeg arguments
//! only at the edge.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::escape::{escape_drawtext_text, escape_filter_path};
use crate::core::captions::{Color, Phrase};
use crate::core::{AnchorPosition, CoreError, CoreResult, FrameSize, Resolution, TimeSec};

/// Frame dimensions used when the source cannot be probed
pub const FALLBACK_FRAME: FrameSize = FrameSize::new(1080, 1920);

/// Default output frame rate
pub const DEFAULT_FPS: u32 = 30;

/// libass default script height, used to place plain SRT captions
const SRT_PLAY_RES_Y: f64 = 288.0;

// =============================================================================
// Options
// =============================================================================

/// Encoder quality tier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Standard,
    High,
    Ultra,
}

impl QualityTier {
    /// libx264 constant rate factor (lower is better)
    pub fn crf(&self) -> u8 {
        match self {
            Self::Standard => 23,
            Self::High => 18,
            Self::Ultra => 15,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl std::str::FromStr for QualityTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(CoreError::Config(format!("Unknown quality tier: {other}"))),
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How captions are burned into the output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionFormat {
    /// Phrase plus boxed active word, drawn with `drawtext`
    #[default]
    DrawText,
    /// SRT file through the `subtitles` filter
    Srt,
    /// Styled ASS file with word highlight through the `ass` filter
    Ass,
    /// No captions, only scaling
    None,
}

impl CaptionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DrawText => "drawtext",
            Self::Srt => "srt",
            Self::Ass => "ass",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for CaptionFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drawtext" => Ok(Self::DrawText),
            "srt" => Ok(Self::Srt),
            "ass" => Ok(Self::Ass),
            "none" => Ok(Self::None),
            other => Err(CoreError::Config(format!("Unknown caption format: {other}"))),
        }
    }
}

impl std::fmt::Display for CaptionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual style of burned captions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptionStyle {
    /// Font file for drawtext
    pub font_file: PathBuf,
    /// Font family for subtitle files
    pub font_name: String,
    /// Font size as a fraction of frame width
    pub font_scale: f64,
    pub text_color: Color,
    /// Box behind the active word
    pub highlight_color: Color,
    pub highlight_border: u32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_file: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf"),
            font_name: "DejaVu Sans".to_string(),
            font_scale: 0.07,
            text_color: Color::white(),
            highlight_color: Color::rgba(255, 0, 0, 242),
            highlight_border: 10,
        }
    }
}

impl CaptionStyle {
    pub fn font_size(&self, frame: FrameSize) -> u32 {
        ((frame.width as f64 * self.font_scale) as u32).max(1)
    }
}

// =============================================================================
// Directives
// =============================================================================

/// One timed `drawtext` instruction
#[derive(Clone, Debug, PartialEq)]
pub struct DrawDirective {
    pub text: String,
    pub start: TimeSec,
    pub end: TimeSec,
    pub font_size: u32,
    pub font_color: Color,
    /// Box colour and border width for the emphasised word
    pub highlight: Option<(Color, u32)>,
    /// Horizontal centre of the text in pixels
    pub center_x: f64,
    /// Top of the text in pixels
    pub top_y: f64,
}

impl DrawDirective {
    /// Filter text, active on `[start, end)` so adjacent words never share a frame
    pub fn to_filter(&self, font_file: &Path) -> String {
        let mut filter = format!(
            "drawtext=fontfile={}:text={}:fontcolor={}:fontsize={}",
            escape_filter_path(&font_file.to_string_lossy()),
            escape_drawtext_text(&self.text),
            self.font_color.to_ffmpeg_color(),
            self.font_size,
        );
        if let Some((color, border)) = self.highlight {
            filter.push_str(&format!(
                ":box=1:boxcolor={}:boxborderw={}",
                color.to_ffmpeg_color(),
                border
            ));
        }
        filter.push_str(&format!(
            ":x={:.0}-text_w/2:y={:.0}:enable=gte(t\\,{:.3})*lt(t\\,{:.3})",
            self.center_x, self.top_y, self.start, self.end
        ));
        filter
    }
}

/// Subtitle file flavour for file-based overlays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtitleKind {
    Srt,
    Ass,
}

/// Caption layer of a render
#[derive(Clone, Debug, PartialEq)]
pub enum Overlay {
    Directives(Vec<DrawDirective>),
    SubtitleFile { path: PathBuf, kind: SubtitleKind },
    None,
}

// =============================================================================
// Render Spec
// =============================================================================

/// Declarative description of one encoder invocation
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSpec {
    source: PathBuf,
    output: PathBuf,
    source_frame: FrameSize,
    resolution: Resolution,
    fps: u32,
    quality: QualityTier,
    anchor: AnchorPosition,
    font_file: PathBuf,
    overlay: Overlay,
}

impl RenderSpec {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn quality(&self) -> QualityTier {
        self.quality
    }

    /// Final output dimensions
    pub fn output_frame(&self) -> FrameSize {
        self.resolution.frame().unwrap_or(self.source_frame)
    }

    /// Joins the overlay and, when the target differs from the source, a
    /// letterboxing scale.
    pub fn filter_graph(&self) -> String {
        let mut parts: Vec<String> = match &self.overlay {
            Overlay::Directives(directives) => directives
                .iter()
                .map(|d| d.to_filter(&self.font_file))
                .collect(),
            Overlay::SubtitleFile { path, kind } => {
                let file = escape_filter_path(&path.to_string_lossy());
                match kind {
                    SubtitleKind::Ass => vec![format!("ass=filename={file}")],
                    SubtitleKind::Srt => {
                        let margin_v = (SRT_PLAY_RES_Y * self.anchor.y_percent / 100.0).round();
                        let force_style =
                            escape_filter_path(&format!("Alignment=2,MarginV={margin_v}"));
                        vec![format!("subtitles=filename={file}:force_style={force_style}")]
                    }
                }
            }
            Overlay::None => Vec::new(),
        };

        if let Some(target) = self.resolution.frame() {
            if target != self.source_frame {
                let (w, h) = (target.width, target.height);
                parts.push(format!(
                    "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
                ));
            }
        }

        if parts.is_empty() {
            "null".to_string()
        } else {
            parts.join(",")
        }
    }

    /// Full argument vector for `ffmpeg`
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            self.source.to_string_lossy().to_string(),
            "-vf".to_string(),
            self.filter_graph(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            self.quality.crf().to_string(),
            "-r".to_string(),
            self.fps.to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            self.output.to_string_lossy().to_string(),
        ]
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`RenderSpec`] from style settings and caption content
#[derive(Clone, Debug)]
pub struct RenderSpecBuilder {
    source: PathBuf,
    output: PathBuf,
    source_frame: FrameSize,
    resolution: Resolution,
    fps: u32,
    quality: QualityTier,
    anchor: AnchorPosition,
    style: CaptionStyle,
}

impl RenderSpecBuilder {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, source_frame: FrameSize) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            source_frame,
            resolution: Resolution::Original,
            fps: DEFAULT_FPS,
            quality: QualityTier::default(),
            anchor: AnchorPosition::default(),
            style: CaptionStyle::default(),
        }
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn anchor(mut self, anchor: AnchorPosition) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn style(mut self, style: CaptionStyle) -> Self {
        self.style = style;
        self
    }

    /// Two directives per word: the whole phrase in the text colour, then
    /// the active word alone on a highlight box, both gated to the word.
    pub fn build_drawtext(self, phrases: &[Phrase]) -> CoreResult<RenderSpec> {
        self.validate()?;

        let frame = self.source_frame;
        let font_size = self.style.font_size(frame);
        let center_x = self.anchor.x_pixels(frame);
        let top_y = self.anchor.y_pixels(frame);

        let mut directives = Vec::with_capacity(phrases.iter().map(|p| p.words.len() * 2).sum());
        for phrase in phrases {
            let phrase_text = phrase.text();
            for word in &phrase.words {
                directives.push(DrawDirective {
                    text: phrase_text.clone(),
                    start: word.start,
                    end: word.end,
                    font_size,
                    font_color: self.style.text_color,
                    highlight: None,
                    center_x,
                    top_y,
                });
                directives.push(DrawDirective {
                    text: word.text.clone(),
                    start: word.start,
                    end: word.end,
                    font_size,
                    font_color: self.style.text_color,
                    highlight: Some((self.style.highlight_color, self.style.highlight_border)),
                    center_x,
                    top_y,
                });
            }
        }

        Ok(self.finish(Overlay::Directives(directives)))
    }

    /// Burns an already written subtitle file
    pub fn build_subtitle_file(self, path: impl Into<PathBuf>, kind: SubtitleKind) -> CoreResult<RenderSpec> {
        self.validate()?;
        Ok(self.finish(Overlay::SubtitleFile {
            path: path.into(),
            kind,
        }))
    }

    /// Re-encodes (and scales) without captions
    pub fn build_plain(self) -> CoreResult<RenderSpec> {
        self.validate()?;
        Ok(self.finish(Overlay::None))
    }

    fn validate(&self) -> CoreResult<()> {
        self.anchor.validate()?;
        if !(1..=120).contains(&self.fps) {
            return Err(CoreError::Validation(format!(
                "Frame rate must be between 1 and 120, got {}",
                self.fps
            )));
        }
        if self.source_frame.width == 0 || self.source_frame.height == 0 {
            return Err(CoreError::Validation(format!(
                "Invalid source frame {}",
                self.source_frame
            )));
        }
        Ok(())
    }

    fn finish(self, overlay: Overlay) -> RenderSpec {
        RenderSpec {
            source: self.source,
            output: self.output,
            source_frame: self.source_frame,
            resolution: self.resolution,
            fps: self.fps,
            quality: self.quality,
            anchor: self.anchor,
            font_file: self.style.font_file,
            overlay,
        }
    }
}
