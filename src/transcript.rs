//! Transcript index for Auto Clipper
//! Parses SRT subtitle sources into ordered, timestamped spans and renders
//! them into the text block the highlight prompt is built from.

use std::path::Path;

use regex::Regex;

use crate::error::{ClipperError, Result};
use crate::types::TranscriptSpan;

/// Parse an SRT-style timestamp ("HH:MM:SS,mmm" or "HH:MM:SS.mmm") to seconds
pub fn parse_timestamp(timestamp: &str) -> Result<f64> {
    let normalized = timestamp.trim().replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() != 3 {
        return Err(ClipperError::malformed(format!(
            "invalid timestamp: '{}'",
            timestamp
        )));
    }

    let hours: f64 = parts[0]
        .parse()
        .map_err(|_| ClipperError::malformed(format!("invalid hours in '{}'", timestamp)))?;
    let minutes: f64 = parts[1]
        .parse()
        .map_err(|_| ClipperError::malformed(format!("invalid minutes in '{}'", timestamp)))?;
    let seconds: f64 = parts[2]
        .parse()
        .map_err(|_| ClipperError::malformed(format!("invalid seconds in '{}'", timestamp)))?;

    Ok(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Format seconds as an SRT timestamp ("HH:MM:SS,mmm")
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse SRT content into chronological, timestamped spans.
/// Malformed blocks are skipped; multi-line cues are collapsed to one line.
pub fn parse_srt(content: &str) -> Vec<TranscriptSpan> {
    let pattern = Regex::new(
        r"(?s)(\d+)\r?\n(\d{2}:\d{2}:\d{2}[,.]\d{3}) --> (\d{2}:\d{2}:\d{2}[,.]\d{3})\r?\n(.*?)(?:\r?\n\r?\n|\z)",
    )
    .expect("srt pattern is valid");

    let mut spans = Vec::new();
    for captures in pattern.captures_iter(content) {
        let (start, end) = match (
            parse_timestamp(&captures[2]),
            parse_timestamp(&captures[3]),
        ) {
            (Ok(start), Ok(end)) => (start, end),
            _ => continue,
        };

        let text = captures[4]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            continue;
        }

        spans.push(TranscriptSpan { start, end, text });
    }

    spans.sort_by(|a, b| a.start.total_cmp(&b.start));
    spans
}

/// Load and parse an SRT file
pub fn load_srt(path: &Path) -> Result<Vec<TranscriptSpan>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_srt(&content))
}

/// Render spans as "[start - end] text" lines for the highlight prompt
pub fn to_prompt_text(spans: &[TranscriptSpan]) -> String {
    spans
        .iter()
        .map(|span| {
            format!(
                "[{} - {}] {}",
                format_timestamp(span.start),
                format_timestamp(span.end),
                span.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
