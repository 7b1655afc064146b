//! Caption System Module
//!
//! Provides the timed-text side of the pipeline:
//! - Transcript data models (TimedText, Segment, Word)
//! - Word timing allocation and phrase layout
//! - SRT import/export and styled ASS export
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Caption System                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  models.rs     - Transcript and layout values                   │
//! │  layout.rs     - Weighted word timing, phrase grouping          │
//! │  formats.rs    - SRT parsing and export                         │
//! │  ass.rs        - ASS script export with word highlight          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod ass;
mod formats;
mod layout;
mod models;

pub use models::{Color, Phrase, Segment, TimedText, TimedWord, Word};

pub use layout::{
    allocate_word_timing, group_into_phrases, layout, segment_words, word_weight, LayoutOptions,
    DEFAULT_MAX_PHRASES, DEFAULT_WORDS_PER_PHRASE,
};

pub use formats::{export_srt, parse_srt, seconds_to_srt_time, srt_time_to_seconds};

pub use ass::{export_ass, seconds_to_ass_time, AssDocument, AssEvent, AssStyle};
