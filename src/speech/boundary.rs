//! Word boundary estimation for engines without positional callbacks
//!
//! The utterance text is split into whitespace-delimited words and each word
//! is assumed to take the same time to speak, derived from a fixed
//! words-per-minute figure scaled by the request's rate.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::RangeInclusive;
use std::time::Duration;

pub const DEFAULT_WORDS_PER_MINUTE: f32 = 150.0;

/// Speaking speeds accepted for estimation; anything else uses the default
pub const WORDS_PER_MINUTE_RANGE: RangeInclusive<f32> = 1.0..=10_000.0;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").expect("valid word pattern"));

/// Position of one word in the utterance text, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSpan {
    pub char_index: usize,
    pub char_length: usize,
}

/// Split `text` into whitespace-delimited words
pub fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    // Byte offsets from the regex, converted to char offsets incrementally
    let mut chars_before = 0;
    let mut last_byte = 0;

    for m in WORD.find_iter(text) {
        chars_before += text[last_byte..m.start()].chars().count();
        let char_length = m.as_str().chars().count();
        spans.push(WordSpan {
            char_index: chars_before,
            char_length,
        });
        chars_before += char_length;
        last_byte = m.end();
    }

    spans
}

/// Assumed duration of each word
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordTiming {
    per_word: Duration,
}

impl WordTiming {
    /// Timing for `words_per_minute` at canonical rate `rate`
    ///
    /// `rate` is expected to be clamped already; non-positive values fall
    /// back to normal speed. Speeds outside [`WORDS_PER_MINUTE_RANGE`] fall
    /// back to [`DEFAULT_WORDS_PER_MINUTE`].
    pub fn new(words_per_minute: f32, rate: f32) -> Self {
        let wpm = if WORDS_PER_MINUTE_RANGE.contains(&words_per_minute) {
            words_per_minute
        } else {
            warn!(
                "Words per minute {} out of range, using {}",
                words_per_minute, DEFAULT_WORDS_PER_MINUTE
            );
            DEFAULT_WORDS_PER_MINUTE
        };
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        let per_word = Duration::try_from_secs_f32(60.0 / (wpm * rate))
            .unwrap_or_else(|_| Duration::from_secs_f32(60.0 / DEFAULT_WORDS_PER_MINUTE));
        Self { per_word }
    }

    pub fn per_word(&self) -> Duration {
        self.per_word
    }

    /// Elapsed seconds once `words` words have been spoken
    pub fn elapsed(&self, words: usize) -> f32 {
        self.per_word.as_secs_f32() * words as f32
    }
}

/// Convert a UTF-16 code unit offset (as reported by SAPI) into a char offset
pub fn utf16_to_char_index(text: &str, utf16_offset: usize) -> usize {
    let mut units = 0;
    for (index, ch) in text.chars().enumerate() {
        if units >= utf16_offset {
            return index;
        }
        units += ch.len_utf16();
    }
    text.chars().count()
}

/// Convert a UTF-16 span into a char span starting at `utf16_offset`
pub fn utf16_span_to_chars(text: &str, utf16_offset: usize, utf16_len: usize) -> WordSpan {
    let start = utf16_to_char_index(text, utf16_offset);
    let end = utf16_to_char_index(text, utf16_offset + utf16_len);
    WordSpan {
        char_index: start,
        char_length: end.saturating_sub(start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_spans() {
        let spans = word_spans("Hello world");
        assert_eq!(
            spans,
            vec![
                WordSpan { char_index: 0, char_length: 5 },
                WordSpan { char_index: 6, char_length: 5 },
            ]
        );
    }

    #[test]
    fn test_word_spans_irregular_whitespace() {
        let spans = word_spans("  one\t\ttwo \n three ");
        let indices: Vec<_> = spans.iter().map(|s| s.char_index).collect();
        assert_eq!(indices, vec![2, 7, 14]);
        assert!(word_spans("   ").is_empty());
        assert!(word_spans("").is_empty());
    }

    #[test]
    fn test_word_spans_count_chars_not_bytes() {
        let spans = word_spans("café naïve 世界");
        assert_eq!(spans[1], WordSpan { char_index: 5, char_length: 5 });
        assert_eq!(spans[2], WordSpan { char_index: 11, char_length: 2 });
    }

    #[test]
    fn test_timing() {
        let timing = WordTiming::new(150.0, 1.0);
        assert_eq!(timing.per_word().as_millis(), 400);
        assert!((timing.elapsed(2) - 0.8).abs() < 1e-5);

        let fast = WordTiming::new(150.0, 2.0);
        assert_eq!(fast.per_word().as_millis(), 200);

        assert_eq!(WordTiming::new(0.0, 0.0).per_word().as_millis(), 400);
    }

    #[test]
    fn test_timing_rejects_extreme_speeds() {
        assert_eq!(WordTiming::new(1e-20, 1.0).per_word().as_millis(), 400);
        assert_eq!(WordTiming::new(f32::INFINITY, 1.0).per_word().as_millis(), 400);
        assert_eq!(WordTiming::new(f32::NAN, 1.0).per_word().as_millis(), 400);
        assert_eq!(WordTiming::new(1e9, 1.0).per_word().as_millis(), 400);
        // Slowest accepted speed at the slowest rate is still representable
        let slowest = WordTiming::new(1.0, 0.1).per_word().as_secs_f32();
        assert!((slowest - 600.0).abs() < 0.01);
    }

    #[test]
    fn test_utf16_conversion() {
        // The emoji is two UTF-16 code units but one char
        let text = "a 🎤 b";
        assert_eq!(utf16_to_char_index(text, 0), 0);
        assert_eq!(utf16_to_char_index(text, 2), 2);
        assert_eq!(utf16_to_char_index(text, 5), 4);
        assert_eq!(utf16_span_to_chars(text, 2, 2), WordSpan { char_index: 2, char_length: 1 });
        assert_eq!(utf16_to_char_index(text, 99), 5);
    }
}
