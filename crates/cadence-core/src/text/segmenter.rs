//! Sentence segmentation for chunked synthesis
//!
//! Text is first cut into sentences after terminal punctuation (delimiters
//! stay with the sentence they end, together with any whitespace that follows
//! them), then consecutive sentences are packed into chunks below the
//! configured length. Concatenating the chunks always gives back the input.

use serde::Serialize;

/// Default maximum chunk length in characters
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 200;

/// A contiguous slice of the input sent as one synthesis request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechChunk {
    /// Position of the chunk in the utterance
    pub index: usize,
    pub text: String,
}

impl SpeechChunk {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into ordered chunks of whole sentences.
///
/// Sentences are packed greedily; a chunk is closed as soon as appending the
/// next sentence would bring it to `max_chunk_chars` or beyond. A sentence
/// that alone is longer than the limit is emitted whole.
pub fn segment(text: &str, max_chunk_chars: usize) -> Vec<SpeechChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        // Reaching the limit closes the chunk, so "A. B. C." at 5 gives three.
        if !current.is_empty() && current_len + len >= max_chunk_chars {
            chunks.push(SpeechChunk {
                index: chunks.len(),
                text: std::mem::take(&mut current),
            });
            current_len = 0;
        }
        current.push_str(sentence);
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(SpeechChunk {
            index: chunks.len(),
            text: current,
        });
    }

    chunks
}

/// Split text after sentence-ending punctuation, keeping every character.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        // "3.14", "e.g", "10:30" are not sentence ends
        if matches!(c, '.' | ':') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_alphanumeric() {
                    continue;
                }
            }
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        while let Some(&(j, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }

        sentences.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

fn is_terminator(c: char) -> bool {
    matches!(
        c,
        '.' | '?' | '!' | ':' | '\n' | '。' | '？' | '！' | '：' | '।' | '॥' | '…'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[SpeechChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text()).collect()
    }

    fn concat(chunks: &[SpeechChunk]) -> String {
        chunks.iter().map(|c| c.text()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(segment("", 200).is_empty());
    }

    #[test]
    fn test_short_sentences_pack_at_limit() {
        let chunks = segment("A. B. C.", 5);
        assert_eq!(texts(&chunks), vec!["A. ", "B. ", "C."]);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_sentences_share_a_chunk_below_limit() {
        let chunks = segment("Hi. How are you? Fine!", 200);
        assert_eq!(texts(&chunks), vec!["Hi. How are you? Fine!"]);
    }

    #[test]
    fn test_trailing_fragment_is_kept() {
        let sentences = split_sentences("First one. and no terminator");
        assert_eq!(sentences, vec!["First one. ", "and no terminator"]);
    }

    #[test]
    fn test_delimiter_runs_stay_together() {
        let sentences = split_sentences("Really?! Yes... ok");
        assert_eq!(sentences, vec!["Really?! ", "Yes... ", "ok"]);
    }

    #[test]
    fn test_newlines_split() {
        let sentences = split_sentences("line one\nline two\n\nthree");
        assert_eq!(sentences, vec!["line one\n", "line two\n\n", "three"]);
    }

    #[test]
    fn test_numbers_and_times_do_not_split() {
        let sentences = split_sentences("Pi is 3.14 at 10:30. Done");
        assert_eq!(sentences, vec!["Pi is 3.14 at 10:30. ", "Done"]);
    }

    #[test]
    fn test_target_language_punctuation() {
        let sentences = split_sentences("你好。你好吗？नमस्ते। ok");
        assert_eq!(sentences, vec!["你好。", "你好吗？", "नमस्ते। ", "ok"]);
    }

    #[test]
    fn test_overlong_sentence_is_not_split() {
        let long = "word ".repeat(60) + "end.";
        let text = format!("Short. {} Tail.", long);
        let chunks = segment(&text, 50);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text(), "Short. ");
        assert!(chunks[1].char_len() > 50);
        assert_eq!(chunks[2].text(), "Tail.");
    }

    #[test]
    fn test_segmentation_is_lossless() {
        let samples = [
            "Plain text without punctuation",
            "One. Two? Three! Four: five\nsix",
            "  leading spaces. trailing spaces.   ",
            "Unicode: café. 日本語。Ελληνικά! ...",
            "\n\n\n",
            "a.b.c. d",
        ];
        for max in [1, 5, 20, 200] {
            for text in samples {
                let chunks = segment(text, max);
                assert_eq!(concat(&chunks), text, "max={max} text={text:?}");
            }
        }
    }

    #[test]
    fn test_only_single_sentences_exceed_limit() {
        let text = "The quick brown fox. Jumps over the lazy dog! Again and again? \
                    Yes. No. Maybe so: perhaps.\nNew line here.";
        let max = 24;
        for chunk in segment(text, max) {
            if chunk.char_len() > max {
                assert_eq!(split_sentences(chunk.text()).len(), 1, "{:?}", chunk.text());
            }
        }
    }
}
