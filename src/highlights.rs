//! Highlight selection module for Auto Clipper
//! Asks the completion model for candidate clip windows over the full
//! transcript and validates them against the duration bounds.

use std::sync::Arc;

use log::{debug, info};
use serde::Deserialize;

use crate::ai::CompletionModel;
use crate::error::{ClipperError, Result};
use crate::state::RunState;
use crate::transcript;
use crate::types::{Highlight, VideoMetadata};

/// Validated clips are at least this long
pub const MIN_CLIP_SECONDS: f64 = 58.0;
/// ... and at most this long
pub const MAX_CLIP_SECONDS: f64 = 120.0;
/// Extra candidates requested to tolerate duration rejects
const OVERSAMPLE: usize = 3;

pub struct HighlightSelector {
    model: Arc<dyn CompletionModel>,
}

/// Candidate as returned by the model
#[derive(Debug, Deserialize)]
struct RawHighlight {
    start_time: String,
    end_time: String,
    title: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    hook_text: String,
}

impl HighlightSelector {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Select up to `count` highlights, in the order the model returned
    /// them. Too-short and too-long candidates are dropped with a log line.
    pub async fn select(
        &self,
        transcript_text: &str,
        metadata: &VideoMetadata,
        count: usize,
        state: &RunState,
    ) -> Result<Vec<Highlight>> {
        let prompt = build_prompt(transcript_text, metadata, count + OVERSAMPLE);
        let completion = self.model.complete(&prompt).await?;
        state.add_token_usage(
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );

        let candidates = parse_candidates(&completion.text)?;
        debug!("model returned {} candidates", candidates.len());

        let mut accepted = Vec::new();
        for raw in candidates {
            let start = transcript::parse_timestamp(&raw.start_time)?;
            let end = transcript::parse_timestamp(&raw.end_time)?;
            let duration = end - start;

            if duration >= MIN_CLIP_SECONDS && duration <= MAX_CLIP_SECONDS {
                info!("  accepted: {} ({:.0}s)", raw.title, duration);
                accepted.push(Highlight {
                    start_time: raw.start_time,
                    end_time: raw.end_time,
                    title: raw.title,
                    reason: raw.reason,
                    hook_text: raw.hook_text,
                    duration_seconds: (duration * 10.0).round() / 10.0,
                });
            } else {
                info!("  dropped: {} ({:.1}s out of bounds)", raw.title, duration);
            }

            if accepted.len() >= count {
                break;
            }
        }

        Ok(accepted)
    }
}

fn build_prompt(transcript_text: &str, metadata: &VideoMetadata, requested: usize) -> String {
    let mut context = String::new();
    if !metadata.title.is_empty() || !metadata.channel.is_empty() {
        context = format!(
            "\nVIDEO INFO:\n- Title: {}\n- Channel: {}\n- Description: {}\n",
            metadata.title,
            metadata.channel,
            metadata.description.chars().take(500).collect::<String>(),
        );
    }

    format!(
        r#"You are a professional video editor for PODCAST content. From the transcript below, pick the {requested} segments best suited for short-form content (TikTok/Reels/Shorts).
{context}
What makes a good segment:
- A punchline or funny moment
- A surprising insight or piece of information
- An emotional or dramatic beat
- A memorable quote
- A complete story or topic (beginning, middle, end)

DURATION RULES - VERY IMPORTANT:
- Every clip MUST run at least 60 seconds and at most 120 seconds
- TARGET duration: 90 seconds

HOOK TEXT:
For each segment, also write a "hook_text" shown at the start of the video as a teaser.
- At most 15 words, short and catchy
- Casual, conversational register
- NO emoji

Transcript:
{transcript_text}

Return a JSON array in this format:
[
  {{
    "start_time": "00:01:23,000",
    "end_time": "00:02:15,000",
    "title": "Short title",
    "reason": "Why this is engaging",
    "hook_text": "Catchy hook line"
  }}
]

Return ONLY the JSON array, no other text."#
    )
}

/// Parse the model payload, tolerating a fenced code block wrapper
fn parse_candidates(text: &str) -> Result<Vec<RawHighlight>> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str(cleaned).map_err(|e| {
        ClipperError::malformed(format!("expected a JSON array of candidates: {}", e))
    })
}

fn strip_code_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Completion, TokenUsage};
    use crate::state::{CancelToken, RunState};
    use async_trait::async_trait;

    struct FixedModel {
        text: String,
    }

    #[async_trait]
    impl CompletionModel for FixedModel {
        async fn complete(&self, _prompt: &str) -> Result<Completion> {
            Ok(Completion {
                text: self.text.clone(),
                usage: TokenUsage {
                    prompt_tokens: 1000,
                    completion_tokens: 100,
                },
            })
        }
    }

    fn candidate(start: &str, end: &str, title: &str) -> String {
        format!(
            r#"{{"start_time": "{start}", "end_time": "{end}", "title": "{title}", "reason": "r", "hook_text": "h"}}"#
        )
    }

    async fn run_select(payload: String, count: usize) -> Result<Vec<Highlight>> {
        let selector = HighlightSelector::new(Arc::new(FixedModel { text: payload }));
        let state = RunState::new(CancelToken::new());
        selector
            .select("[00:00:00,000 - 00:10:00,000] talk", &VideoMetadata::default(), count, &state)
            .await
    }

    #[tokio::test]
    async fn test_duration_boundary_is_inclusive_at_58() {
        // 57.9s is rejected, 58.0s is accepted
        let payload = format!(
            "[{},{}]",
            candidate("00:00:10,000", "00:01:07,900", "short"),
            candidate("00:02:00,000", "00:02:58,000", "exact"),
        );
        let accepted = run_select(payload, 5).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].title, "exact");
        assert_eq!(accepted[0].duration_seconds, 58.0);
    }

    #[tokio::test]
    async fn test_overlong_candidates_are_dropped() {
        let payload = format!(
            "[{},{}]",
            candidate("00:00:00,000", "00:02:30,500", "marathon"),
            candidate("00:03:00,000", "00:04:30,000", "fits"),
        );
        let accepted = run_select(payload, 5).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].title, "fits");
    }

    #[tokio::test]
    async fn test_acceptance_stops_exactly_at_count() {
        let payload = format!(
            "[{},{},{},{}]",
            candidate("00:00:00,000", "00:01:30,000", "a"),
            candidate("00:02:00,000", "00:03:30,000", "b"),
            candidate("00:04:00,000", "00:05:30,000", "c"),
            candidate("00:06:00,000", "00:07:30,000", "d"),
        );
        let accepted = run_select(payload, 2).await.unwrap();
        assert_eq!(accepted.len(), 2);
        // Model order is preserved, never re-ranked
        assert_eq!(accepted[0].title, "a");
        assert_eq!(accepted[1].title, "b");
    }

    #[tokio::test]
    async fn test_fenced_response_is_tolerated() {
        let payload = format!(
            "```json\n[{}]\n```",
            candidate("00:00:00,000", "00:01:30,000", "fenced")
        );
        let accepted = run_select(payload, 1).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].title, "fenced");
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed_response() {
        let result = run_select("here are your clips!".to_string(), 1).await;
        assert!(matches!(result, Err(ClipperError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_missing_field_is_malformed_response() {
        let payload = r#"[{"start_time": "00:00:00,000", "end_time": "00:01:30,000"}]"#.to_string();
        let result = run_select(payload, 1).await;
        assert!(matches!(result, Err(ClipperError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_usage_is_accumulated() {
        let selector = HighlightSelector::new(Arc::new(FixedModel {
            text: format!("[{}]", candidate("00:00:00,000", "00:01:30,000", "a")),
        }));
        let state = RunState::new(CancelToken::new());
        selector
            .select("t", &VideoMetadata::default(), 1, &state)
            .await
            .unwrap();
        assert_eq!(state.usage().prompt_tokens, 1000);
        assert_eq!(state.usage().completion_tokens, 100);
    }

    #[test]
    fn test_duration_is_rounded_to_one_decimal() {
        // 90.04s rounds down to 90.0
        let duration: f64 = 90.04;
        assert_eq!((duration * 10.0).round() / 10.0, 90.0);
    }

    #[test]
    fn test_prompt_mentions_requested_count_and_metadata() {
        let metadata = VideoMetadata {
            title: "Episode 42".to_string(),
            description: "A talk".to_string(),
            channel: "The Show".to_string(),
        };
        let prompt = build_prompt("[...] text", &metadata, 8);
        assert!(prompt.contains("the 8 segments"));
        assert!(prompt.contains("Episode 42"));
        assert!(prompt.contains("The Show"));
        assert!(prompt.contains("ONLY the JSON array"));
    }
}
