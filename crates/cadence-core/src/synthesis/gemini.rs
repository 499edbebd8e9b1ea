//! Gemini generative language API backend

use async_trait::async_trait;
use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{FrameStream, SynthesisBackend};
use super::sse::SseDecoder;
use crate::audio::AudioFrame;
use crate::config::SpeechConfig;
use crate::credentials::Credential;
use crate::error::{Error, Result};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Longest slice of an error body kept in a transport failure message
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechVoiceConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorBody {
    code: Option<u16>,
    message: String,
}

impl GenerateContentResponse {
    fn into_parts(self) -> Result<Vec<ResponsePart>> {
        if let Some(error) = self.error {
            return Err(Error::TransportFailure(format!(
                "API error {}: {}",
                error.code.unwrap_or_default(),
                error.message
            )));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default())
    }
}

/// Speech and text over the Gemini REST API
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    speech_model: String,
    text_model: String,
    voice_name: String,
}

impl GeminiBackend {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            speech_model: config.speech_model.clone(),
            text_model: config.text_model.clone(),
            voice_name: config.voice_name.clone(),
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }
}

#[async_trait]
impl SynthesisBackend for GeminiBackend {
    async fn stream_speech(&self, text: &str, credential: &Credential) -> Result<FrameStream> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text }],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechVoiceConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &self.voice_name,
                        },
                    },
                },
            }),
        };

        let url = format!(
            "{}?alt=sse",
            self.model_url(&self.speech_model, "streamGenerateContent")
        );
        debug!(model = %self.speech_model, credential = credential.index(), "Opening speech stream");

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, credential.token())
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(Box::pin(frames_from_sse(response.bytes_stream())))
    }

    async fn generate_text(&self, prompt: &str, credential: &Credential) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: None,
        };

        debug!(model = %self.text_model, credential = credential.index(), "Generating text");

        let response = self
            .client
            .post(self.model_url(&self.text_model, "generateContent"))
            .header(API_KEY_HEADER, credential.token())
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: GenerateContentResponse = response.json().await?;

        let text: String = parsed
            .into_parts()?
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(Error::TransportFailure(
                "text response had no content".to_string(),
            ));
        }
        Ok(text)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    Err(Error::TransportFailure(format!("HTTP {}: {}", status, body)))
}

/// Turn an SSE byte stream into audio frames.
fn frames_from_sse<S>(bytes: S) -> impl Stream<Item = Result<AudioFrame>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                for frame in frames_from_event(&event)? {
                    yield frame;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            for frame in frames_from_event(&event)? {
                yield frame;
            }
        }
    }
}

fn frames_from_event(data: &str) -> Result<Vec<AudioFrame>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }

    let response: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| Error::TransportFailure(format!("malformed stream event: {}", e)))?;
    Ok(response
        .into_parts()?
        .into_iter()
        .filter_map(|p| p.inline_data)
        .filter(|d| !d.data.is_empty())
        .inspect(|d| {
            if let Some(mime) = &d.mime_type {
                debug!(mime = %mime, bytes = d.data.len(), "Audio frame received");
            }
        })
        .map(|d| AudioFrame::from_base64(d.data))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPool;
    use futures::stream;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn audio_event(payload: &str) -> String {
        let event = json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "inlineData": { "mimeType": "audio/L16;rate=24000", "data": payload }
                    }]
                }
            }]
        });
        format!("data: {}\r\n\r\n", event)
    }

    fn backend_for(server: &MockServer) -> GeminiBackend {
        let config = SpeechConfig {
            api_base_url: server.uri(),
            ..SpeechConfig::default()
        };
        GeminiBackend::new(&config).unwrap()
    }

    fn credential(token: &str) -> Credential {
        CredentialPool::new([token]).unwrap().current().unwrap()
    }

    #[test]
    fn test_event_without_audio_yields_nothing() {
        let event = json!({ "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }] });
        assert!(frames_from_event(&event.to_string()).unwrap().is_empty());
        assert!(frames_from_event("[DONE]").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_event_is_transport_failure() {
        assert!(matches!(
            frames_from_event("{not json"),
            Err(Error::TransportFailure(_))
        ));
    }

    #[test]
    fn test_error_event_is_transport_failure() {
        let event = json!({ "error": { "code": 429, "message": "quota" } });
        assert!(matches!(
            frames_from_event(&event.to_string()),
            Err(Error::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_frames_survive_chunk_boundaries() {
        let raw = format!("{}{}", audio_event("AAAA"), audio_event("BBBB"));
        let (a, b) = raw.as_bytes().split_at(37);
        let chunks: Vec<reqwest::Result<Bytes>> =
            vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))];

        let frames: Vec<AudioFrame> = frames_from_sse(stream::iter(chunks))
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(
            frames,
            vec![AudioFrame::from_base64("AAAA"), AudioFrame::from_base64("BBBB")]
        );
    }

    #[tokio::test]
    async fn test_stream_speech_sends_key_and_streams_frames() {
        let server = MockServer::start().await;
        let body = format!("{}{}", audio_event("AAAA"), audio_event("AQID"));

        Mock::given(method("POST"))
            .and(path(
                "/v1beta/models/gemini-2.5-flash-preview-tts:streamGenerateContent",
            ))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "key-one"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let frames: Vec<_> = backend
            .stream_speech("Hello.", &credential("key-one"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_ref().unwrap().payload(), "AQID");
    }

    #[tokio::test]
    async fn test_quota_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let result = backend.stream_speech("Hello.", &credential("key")).await;

        match result {
            Err(Error::TransportFailure(message)) => {
                assert!(message.contains("429"));
                assert!(message.contains("RESOURCE_EXHAUSTED"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_generate_text_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Hello " }, { "text": "there." }] }
                }]
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let text = backend
            .generate_text("Say hi", &credential("key"))
            .await
            .unwrap();
        assert_eq!(text, "Hello there.");
    }
}
