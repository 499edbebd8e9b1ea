//! Turning chat markdown into speakable text

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?(?:```|$)").expect("code block pattern"));
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("link pattern"));
static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://|www\.)[^\s<>()\[\]]*[^\s<>()\[\].,!?:;'"]"#).expect("url pattern")
});
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").expect("heading pattern"));
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+|~~|`").expect("emphasis pattern"));
static UNDERSCORE_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\s)_+|_+(\s|$)").expect("underscore pattern"));

/// Rules applied before segmentation
#[derive(Debug, Clone)]
pub struct SpeechTextOptions {
    /// Spoken instead of each URL
    pub url_placeholder: String,
    /// Characters kept after cleanup
    pub max_chars: usize,
}

impl Default for SpeechTextOptions {
    fn default() -> Self {
        Self {
            url_placeholder: "a link".to_string(),
            max_chars: 3000,
        }
    }
}

/// Strip code blocks and markdown emphasis, replace URLs with the spoken
/// placeholder and cut the result down to `max_chars`.
pub fn prepare_for_speech(text: &str, options: &SpeechTextOptions) -> String {
    let text = CODE_BLOCK.replace_all(text, " ");
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = URL.replace_all(&text, options.url_placeholder.as_str());
    let text = HEADING.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    let text = UNDERSCORE_EMPHASIS.replace_all(&text, "${1}${2}");

    truncate_chars(text.trim(), options.max_chars)
}

/// Keep at most `max_chars` characters, backing off to the last whitespace
/// so a word is not cut in half.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let head = &text[..cut];
    match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => head[..space].trim_end().to_string(),
        _ => head.to_string(),
    }
}
