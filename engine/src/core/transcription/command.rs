//! External Command Transcriber
//!
//! Runs a configured program (for example a faster-whisper wrapper script)
//! and parses the JSON it prints on stdout.
//!
//! Arguments may contain `{audio}`, `{language}` and `{word_timestamps}`
//! placeholders. The expected output is either an object with a `segments`
//! array or a bare array of segments:
//!
//! ```json
//! {"language": "en", "segments": [
//!   {"start": 0.0, "end": 1.4, "text": "Hello there",
//!    "words": [{"word": "Hello", "start": 0.0, "end": 0.6, "probability": 0.93}]}
//! ]}
//! ```

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Transcriber, TranscriptionRequest};
use crate::core::captions::{Segment, TimedText, Word};
use crate::core::process::{run_captured, tool_command, ToolRunError};
use crate::core::{CoreError, CoreResult};

/// Transcriber backed by an external program
#[derive(Clone, Debug)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Builds from a command line such as `whisper-json {audio} --lang {language}`
    pub fn from_command_line(command_line: &str) -> CoreResult<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            CoreError::Config("Transcriber command is empty".to_string())
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn expand_args(&self, audio: &Path, request: &TranscriptionRequest) -> Vec<String> {
        let audio = audio.to_string_lossy();
        let language = request.language.as_deref().unwrap_or("auto");
        let word_timestamps = if request.word_timestamps { "true" } else { "false" };

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{audio}", &audio)
                    .replace("{language}", language)
                    .replace("{word_timestamps}", word_timestamps)
            })
            .collect()
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    fn name(&self) -> &str {
        &self.program
    }

    async fn transcribe(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
    ) -> CoreResult<TimedText> {
        let mut cmd = tool_command(&self.program);
        cmd.args(self.expand_args(audio, request));

        tracing::debug!("Running transcriber {} on {}", self.program, audio.display());

        let output = run_captured(cmd, self.timeout).await.map_err(|e| match e {
            ToolRunError::TimedOut { .. } => CoreError::Timeout(e.to_string()),
            ToolRunError::Spawn { .. } => CoreError::tool("transcriber", e.to_string()),
        })?;

        if !output.success {
            return Err(CoreError::tool("transcriber", output.stderr));
        }

        let mut timed_text = parse_transcript_json(&output.stdout)?;
        if !request.word_timestamps {
            for segment in &mut timed_text.segments {
                segment.words.clear();
            }
        }
        if timed_text.language.is_none() {
            timed_text.language = request.language.clone();
        }
        Ok(timed_text)
    }
}

// =============================================================================
// Output Parsing
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTranscript {
    Document {
        #[serde(default)]
        language: Option<String>,
        segments: Vec<RawSegment>,
    },
    Segments(Vec<RawSegment>),
}

#[derive(Deserialize)]
struct RawSegment {
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    words: Vec<RawWord>,
}

#[derive(Deserialize)]
struct RawWord {
    #[serde(alias = "text")]
    word: String,
    start: f64,
    end: f64,
    #[serde(default, alias = "confidence")]
    probability: Option<f64>,
}

/// Parses recogniser JSON into a validated transcript.
///
/// Word boundaries are repaired so that words never overlap (recognisers
/// occasionally report a word starting a few ms before the previous ends)
/// and confidence is clamped into [0, 1].
pub fn parse_transcript_json(json: &str) -> CoreResult<TimedText> {
    let raw: RawTranscript = serde_json::from_str(json.trim()).map_err(|e| {
        CoreError::tool("transcriber", format!("Unreadable transcript output: {e}"))
    })?;

    let (language, raw_segments) = match raw {
        RawTranscript::Document { language, segments } => (language, segments),
        RawTranscript::Segments(segments) => (None, segments),
    };

    let mut segments = Vec::with_capacity(raw_segments.len());
    for (index, raw_segment) in raw_segments.into_iter().enumerate() {
        let start = raw_segment.start.max(0.0);
        let end = raw_segment.end.max(start);

        let mut words = Vec::with_capacity(raw_segment.words.len());
        let mut cursor = start;
        for raw_word in raw_segment.words {
            let text = raw_word.word.trim();
            if text.is_empty() {
                continue;
            }
            let word_start = raw_word.start.max(cursor);
            let word_end = raw_word.end.max(word_start);
            let confidence = raw_word.probability.unwrap_or(0.0).clamp(0.0, 1.0);
            words.push(Word::new(text, word_start, word_end).with_confidence(confidence));
            cursor = word_end;
        }

        let text = if raw_segment.text.trim().is_empty() {
            words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            raw_segment.text.trim().to_string()
        };

        segments.push(Segment::new(index as u32, start, end, &text).with_words(words));
    }

    let timed_text = TimedText { language, segments };
    timed_text
        .validate()
        .map_err(|e| CoreError::tool("transcriber", e.to_string()))?;
    Ok(timed_text)
}
