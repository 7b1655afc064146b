//! Caption Layout Engine
//!
//! Turns a transcript into per-word display intervals and groups them into
//! short phrases for the highlight renderer.
//!
//! Words without engine-native timing get a share of their segment span
//! proportional to their weight, so longer words stay on screen longer.

use serde::{Deserialize, Serialize};

use super::models::{Phrase, Segment, TimedText, TimedWord};
use crate::core::{CoreError, CoreResult, TimeSec};

/// Default number of words shown together
pub const DEFAULT_WORDS_PER_PHRASE: usize = 3;

/// Default cap on phrases handed to the renderer
pub const DEFAULT_MAX_PHRASES: usize = 20;

/// Phrase grouping parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutOptions {
    pub words_per_phrase: usize,
    pub max_phrases: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            words_per_phrase: DEFAULT_WORDS_PER_PHRASE,
            max_phrases: DEFAULT_MAX_PHRASES,
        }
    }
}

/// Display weight of a word: `max(1, 0.5 * char_count)`
pub fn word_weight(word: &str) -> f64 {
    (word.chars().count() as f64 * 0.5).max(1.0)
}

/// Splits `[start, end)` across `words` in proportion to their weights.
///
/// Each share is `(weight / total_weight) * duration`, evaluated in that
/// order so edited timings reproduce to the bit. Assignment is sequential
/// from `start` and the last word ends exactly at `end`, so the durations
/// always sum to the segment duration.
pub fn allocate_word_timing<S: AsRef<str>>(
    words: &[S],
    start: TimeSec,
    end: TimeSec,
) -> Vec<TimedWord> {
    if words.is_empty() {
        return Vec::new();
    }

    let weights: Vec<f64> = words.iter().map(|w| word_weight(w.as_ref())).collect();
    let total_weight: f64 = weights.iter().sum();
    let duration = (end - start).max(0.0);

    let mut timed = Vec::with_capacity(words.len());
    let mut cursor = start;
    let last = words.len() - 1;

    for (index, (word, weight)) in words.iter().zip(&weights).enumerate() {
        let share = if total_weight > 0.0 {
            (weight / total_weight) * duration
        } else {
            duration / words.len() as f64
        };

        let word_end = if index == last { end.max(start) } else { cursor + share };
        timed.push(TimedWord::new(word.as_ref(), cursor, word_end));
        cursor = word_end;
    }

    timed
}

/// Resolves the display words of one segment.
///
/// Engine-native word timings are used while they still spell the segment
/// text; an edited segment falls back to weighted allocation over its text.
pub fn segment_words(segment: &Segment) -> Vec<TimedWord> {
    let text_words: Vec<&str> = segment.text.split_whitespace().collect();

    if !segment.words.is_empty() {
        let native: Vec<&str> = segment
            .words
            .iter()
            .flat_map(|w| w.text.split_whitespace())
            .collect();
        if native == text_words {
            return segment
                .words
                .iter()
                .filter(|w| !w.text.trim().is_empty())
                .map(|w| TimedWord::new(w.text.trim(), w.start, w.end))
                .collect();
        }
    }

    allocate_word_timing(&text_words, segment.start, segment.end)
}

/// Groups consecutive words into fixed-size windows; the last may be shorter
pub fn group_into_phrases(words: &[TimedWord], window: usize) -> CoreResult<Vec<Phrase>> {
    if window == 0 {
        return Err(CoreError::Validation(
            "Words per phrase must be at least 1".to_string(),
        ));
    }

    Ok(words
        .chunks(window)
        .filter_map(|chunk| Phrase::from_words(chunk.to_vec()))
        .collect())
}

/// Lays out the whole transcript into at most `max_phrases` phrases
pub fn layout(timed_text: &TimedText, options: &LayoutOptions) -> CoreResult<Vec<Phrase>> {
    let words: Vec<TimedWord> = timed_text.segments.iter().flat_map(segment_words).collect();

    let mut phrases = group_into_phrases(&words, options.words_per_phrase)?;
    if phrases.len() > options.max_phrases {
        tracing::warn!(
            "Caption layout truncated: {} phrases, keeping the first {}",
            phrases.len(),
            options.max_phrases
        );
        phrases.truncate(options.max_phrases);
    }

    Ok(phrases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::captions::models::Word;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_word_weight() {
        assert_eq!(word_weight("a"), 1.0);
        assert_eq!(word_weight("hi"), 1.0);
        assert_eq!(word_weight("hello"), 2.5);
        assert_eq!(word_weight(""), 1.0);
    }

    #[test]
    fn test_allocation_hello_world() {
        let timed = allocate_word_timing(&["Hello", "world"], 0.0, 2.0);
        assert_eq!(timed.len(), 2);
        assert!((timed[0].start - 0.0).abs() < EPS);
        assert!((timed[0].end - 1.0).abs() < EPS);
        assert!((timed[1].start - 1.0).abs() < EPS);
        assert_eq!(timed[1].end, 2.0);
    }

    #[test]
    fn test_allocation_proportional_to_weight() {
        let timed = allocate_word_timing(&["I", "understand"], 10.0, 16.0);
        // weights 1 and 5
        assert!((timed[0].end - 11.0).abs() < EPS);
        assert_eq!(timed[1].end, 16.0);
    }

    #[test]
    fn test_allocation_sums_to_duration_exactly() {
        let words = ["a", "bb", "ccc", "dddd", "eeeee", "ffffff", "g"];
        let timed = allocate_word_timing(&words, 0.1, 0.7);
        assert_eq!(timed.first().unwrap().start, 0.1);
        assert_eq!(timed.last().unwrap().end, 0.7);
        for pair in timed.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start <= pair[0].end);
        }
    }

    #[test]
    fn test_allocation_share_order_is_bit_exact() {
        // total weight 11.5 is not a power of two
        let words = ["hello", "brave", "new", "world", "again"];
        let weights: Vec<f64> = words.iter().map(|w| word_weight(w)).collect();
        let total: f64 = weights.iter().sum();

        for step in 0..500u32 {
            let start = f64::from(step) * 0.013;
            let end = start + 0.7 + f64::from(step % 17) * 0.031;
            let timed = allocate_word_timing(&words, start, end);

            let mut cursor = start;
            for (word, weight) in timed.iter().zip(&weights).take(words.len() - 1) {
                let expected = cursor + (weight / total) * (end - start);
                assert_eq!(word.end.to_bits(), expected.to_bits(), "start {start}");
                cursor = expected;
            }
            assert_eq!(timed.last().unwrap().end, end);
        }
    }

    #[test]
    fn test_allocation_empty_and_zero_span() {
        let none: [&str; 0] = [];
        assert!(allocate_word_timing(&none, 0.0, 1.0).is_empty());

        let timed = allocate_word_timing(&["x", "y"], 3.0, 3.0);
        assert!(timed.iter().all(|w| w.start == 3.0 && w.end == 3.0));
    }

    #[test]
    fn test_segment_words_prefers_native_timing() {
        let segment = Segment::new(0, 0.0, 2.0, "hello world").with_words(vec![
            Word::new(" hello", 0.2, 0.6),
            Word::new(" world", 1.1, 1.9),
        ]);
        let words = segment_words(&segment);
        assert_eq!(words[0], TimedWord::new("hello", 0.2, 0.6));
        assert_eq!(words[1], TimedWord::new("world", 1.1, 1.9));
    }

    #[test]
    fn test_segment_words_falls_back_after_edit() {
        let segment = Segment::new(0, 0.0, 2.0, "hello there").with_words(vec![
            Word::new("hello", 0.2, 0.6),
            Word::new("world", 1.1, 1.9),
        ]);
        let words = segment_words(&segment);
        assert_eq!(words[1].text, "there");
        assert_eq!(words[0].start, 0.0);
        assert_eq!(words[1].end, 2.0);
    }

    #[test]
    fn test_group_into_phrases() {
        let words = allocate_word_timing(&["a", "b", "c", "d", "e", "f", "g"], 0.0, 7.0);
        let phrases = group_into_phrases(&words, 3).unwrap();
        let sizes: Vec<usize> = phrases.iter().map(|p| p.words.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(phrases[0].start, 0.0);
        assert_eq!(phrases[2].end, 7.0);
        assert!(group_into_phrases(&words, 0).is_err());
    }

    #[test]
    fn test_layout_caps_phrase_count() {
        let text = (0..90).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let tt = TimedText::new(vec![Segment::new(0, 0.0, 90.0, &text)]);

        let phrases = layout(&tt, &LayoutOptions::default()).unwrap();
        assert_eq!(phrases.len(), 20);
        assert_eq!(phrases[19].words.last().unwrap().text, "w59");
    }

    #[test]
    fn test_layout_spans_segments() {
        let tt = TimedText::new(vec![
            Segment::new(0, 0.0, 1.0, "one two"),
            Segment::new(1, 2.0, 3.0, "three four"),
        ]);
        let phrases = layout(&tt, &LayoutOptions::default()).unwrap();
        assert_eq!(phrases.len(), 2);
        assert_eq!(phrases[0].text(), "one two three");
        assert_eq!(phrases[1].text(), "four");
    }

    #[test]
    fn test_layout_skips_blank_segments() {
        let tt = TimedText::new(vec![Segment::new(0, 0.0, 1.0, "   ")]);
        assert!(layout(&tt, &LayoutOptions::default()).unwrap().is_empty());
    }
}
