//! AI collaborator ports for Auto Clipper
//! Traits for the completion, speech-to-text and text-to-speech services,
//! plus their usage-carrying response types.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use openai::OpenAiClient;

/// Token counts reported by the completion service
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One completion response: raw text plus usage
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// A word with its timestamps, seconds from audio start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordSpan {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A coarser transcription segment, used when word timing is unavailable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpan {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Speech-to-text result. `words` is preferred; `segments` is the fallback.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub words: Vec<WordSpan>,
    pub segments: Vec<SegmentSpan>,
}

/// Completion-model collaborator
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion>;
}

/// Speech-to-text collaborator; word-level timestamps are requested
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, language: &str) -> Result<Transcription>;
}

/// Text-to-speech collaborator
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}
