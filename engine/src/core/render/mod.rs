//! Render Module
//!
//! Converts laid-out captions and style settings into a declarative
//! [`RenderSpec`] for the encoder.
//!
//! # Modules
//!
//! - `spec`: quality tiers, caption formats, draw directives and the builder
//! - `escape`: filtergraph escaping for untrusted caption text and paths

mod escape;
mod spec;

pub use escape::{escape_drawtext_text, escape_filter_path};
pub use spec::{
    CaptionFormat, CaptionStyle, DrawDirective, Overlay, QualityTier, RenderSpec,
    RenderSpecBuilder, SubtitleKind, DEFAULT_FPS, FALLBACK_FRAME,
};
