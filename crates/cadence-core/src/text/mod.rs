//! Text preparation and segmentation ahead of synthesis

mod prepare;
mod segmenter;

pub use prepare::{prepare_for_speech, SpeechTextOptions};
pub use segmenter::{segment, split_sentences, SpeechChunk, DEFAULT_MAX_CHUNK_CHARS};
