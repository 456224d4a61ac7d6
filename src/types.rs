//! Shared data types for Auto Clipper

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application name constant
pub const APP_NAME: &str = "Auto Clipper";

/// Application version constant
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source video metadata reported by the downloader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel: String,
}

/// One subtitle span from the source transcript, seconds from video start
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A highlight accepted for clipping. Timestamps keep the SRT-style form
/// the model returned them in; `duration_seconds` is validated to lie in
/// `[58, 120]` and rounded to one decimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub start_time: String,
    pub end_time: String,
    pub title: String,
    pub reason: String,
    pub hook_text: String,
    pub duration_seconds: f64,
}

/// Stream properties probed from a media file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// One detected face box in pixel units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }
}

/// Metadata persisted as data.json next to each finished clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub title: String,
    pub hook_text: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
}

/// Finished clip summary returned by the pipeline
#[derive(Debug, Clone)]
pub struct ClipResult {
    pub index: usize,
    pub title: String,
    pub video_path: PathBuf,
    pub metadata_path: PathBuf,
    pub duration_seconds: f64,
    pub hook_duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_box_geometry() {
        let face = FaceBox {
            x: 100.0,
            y: 50.0,
            width: 80.0,
            height: 120.0,
        };
        assert_eq!(face.area(), 9600.0);
        assert_eq!(face.center_x(), 140.0);
    }

    #[test]
    fn test_clip_metadata_serialization() {
        let metadata = ClipMetadata {
            title: "The big reveal".to_string(),
            hook_text: "You will not believe this".to_string(),
            start_time: "00:01:23,000".to_string(),
            end_time: "00:02:55,500".to_string(),
            duration_seconds: 92.5,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        let parsed: ClipMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.title, metadata.title);
        assert_eq!(parsed.duration_seconds, 92.5);
    }

    #[test]
    fn test_video_metadata_defaults() {
        let parsed: VideoMetadata = serde_json::from_str(r#"{"title": "Episode 12"}"#).unwrap();
        assert_eq!(parsed.title, "Episode 12");
        assert!(parsed.description.is_empty());
        assert!(parsed.channel.is_empty());
    }
}
