//! Configuration types for the Cadence speech pipeline

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Speech pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Base URL of the generative language API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Model used for streaming speech synthesis
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Model used for full text responses
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Prebuilt voice name
    #[serde(default = "default_voice_name")]
    pub voice_name: String,

    /// Sample rate of the PCM frames returned by the API
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Maximum characters per synthesis request
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Maximum characters spoken per utterance
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Attempts per chunk for streaming speech
    #[serde(default = "default_speech_max_attempts")]
    pub speech_max_attempts: usize,

    /// Attempts per prompt for text generation
    #[serde(default = "default_text_max_attempts")]
    pub text_max_attempts: usize,

    /// Deadline for opening a request and for each subsequent frame
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Grace period after the timeline drains before a session is forced idle
    #[serde(default = "default_completion_grace_ms")]
    pub completion_grace_ms: u64,

    /// Spoken in place of URLs
    #[serde(default = "default_url_placeholder")]
    pub url_placeholder: String,

    /// Returned by text generation when every credential has failed
    #[serde(default = "default_apology_message")]
    pub apology_message: String,
}

impl SpeechConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            speech_model: default_speech_model(),
            text_model: default_text_model(),
            voice_name: default_voice_name(),
            sample_rate: default_sample_rate(),
            max_chunk_chars: default_max_chunk_chars(),
            max_text_chars: default_max_text_chars(),
            speech_max_attempts: default_speech_max_attempts(),
            text_max_attempts: default_text_max_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            completion_grace_ms: default_completion_grace_ms(),
            url_placeholder: default_url_placeholder(),
            apology_message: default_apology_message(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_speech_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_voice_name() -> String {
    "Kore".to_string()
}

fn default_sample_rate() -> u32 {
    24000
}

fn default_max_chunk_chars() -> usize {
    200
}

fn default_max_text_chars() -> usize {
    3000
}

fn default_speech_max_attempts() -> usize {
    3
}

fn default_text_max_attempts() -> usize {
    4
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_completion_grace_ms() -> u64 {
    1_500
}

fn default_url_placeholder() -> String {
    "a link".to_string()
}

fn default_apology_message() -> String {
    "Sorry, I can't answer right now. Please try again in a little while.".to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_cors_enabled(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: SpeechConfig = toml::from_str(
            r#"
            voice_name = "Puck"
            max_chunk_chars = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.voice_name, "Puck");
        assert_eq!(config.max_chunk_chars, 120);
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.speech_max_attempts, 3);
        assert_eq!(config.text_max_attempts, 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
    }
}
