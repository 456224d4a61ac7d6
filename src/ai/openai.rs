//! OpenAI-compatible API client for Auto Clipper
//! One client serves all three ports: chat completions for highlight
//! selection, whisper transcription for captions, speech synthesis for
//! the hook.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ClipperError, Result};

use super::{
    Completion, CompletionModel, SegmentSpan, SpeechToText, TextToSpeech, TokenUsage,
    Transcription, WordSpan,
};

const TRANSCRIPTION_MODEL: &str = "whisper-1";
const TTS_MODEL: &str = "tts-1";

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_base: String,
    completion_model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    words: Option<Vec<ApiWord>>,
    #[serde(default)]
    segments: Option<Vec<ApiSegment>>,
}

#[derive(Debug, Deserialize)]
struct ApiWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    text: String,
    start: f64,
    end: f64,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        completion_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            completion_model: completion_model.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }
}

#[async_trait]
impl CompletionModel for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<Completion> {
        debug!(
            "requesting completion from {} ({} prompt chars)",
            self.completion_model,
            prompt.len()
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.completion_model,
                "messages": [ChatMessage { role: "user", content: prompt }],
                "temperature": 0.7,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClipperError::api(
                "completion",
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        let body: ChatResponse = response.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClipperError::api("completion", "response carried no content"))?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl SpeechToText for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>, language: &str) -> Result<Transcription> {
        let file = Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .part("file", file)
            .text("model", TRANSCRIPTION_MODEL)
            .text("language", language.to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClipperError::api(
                "transcription",
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        let body: VerboseTranscription = response.json().await?;
        let words = body
            .words
            .unwrap_or_default()
            .into_iter()
            .map(|w| WordSpan {
                word: w.word,
                start: w.start,
                end: w.end,
            })
            .collect::<Vec<_>>();
        let segments = body
            .segments
            .unwrap_or_default()
            .into_iter()
            .map(|s| SegmentSpan {
                text: s.text,
                start: s.start,
                end: s.end,
            })
            .collect::<Vec<_>>();

        if words.is_empty() && !segments.is_empty() {
            warn!("no word-level timestamps, falling back to segments");
        }

        Ok(Transcription { words, segments })
    }
}

#[async_trait]
impl TextToSpeech for OpenAiClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.endpoint("audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": TTS_MODEL,
                "voice": voice,
                "input": text,
                "speed": 1.0,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClipperError::api(
                "speech",
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = r#"{
            "choices": [{"message": {"content": "[{\"start_time\": \"00:01:00,000\"}]"}}],
            "usage": {"prompt_tokens": 1200, "completion_tokens": 230}
        }"#;
        let body: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(body.choices[0].message.content.as_ref().unwrap().starts_with('['));
        let usage = body.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 1200);
        assert_eq!(usage.completion_tokens, 230);
    }

    #[test]
    fn test_parse_verbose_transcription_with_words() {
        let json = r#"{
            "words": [{"word": "hello", "start": 0.1, "end": 0.5}],
            "segments": [{"text": "hello there", "start": 0.1, "end": 1.2}]
        }"#;
        let body: VerboseTranscription = serde_json::from_str(json).unwrap();
        let words = body.words.unwrap();
        assert_eq!(words[0].word, "hello");
        assert_eq!(words[0].end, 0.5);
    }

    #[test]
    fn test_parse_verbose_transcription_segments_only() {
        let json = r#"{"segments": [{"text": "hi", "start": 0.0, "end": 0.8}]}"#;
        let body: VerboseTranscription = serde_json::from_str(json).unwrap();
        assert!(body.words.is_none());
        assert_eq!(body.segments.unwrap().len(), 1);
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let client = OpenAiClient::new("k", "https://api.example.com/v1/", "gpt-4.1");
        assert_eq!(
            client.endpoint("chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
