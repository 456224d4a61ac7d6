//! Configuration management for Auto Clipper
//! Handles loading and saving settings to settings.json

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Speaker-tracking and stabilization parameters
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CropSettings {
    /// How many frames per second the face scan samples
    #[serde(default = "default_sample_fps")]
    pub sample_fps: f64,
    /// Width of the centered median window, in seconds
    #[serde(default = "default_smoothing_window_secs")]
    pub smoothing_window_secs: f64,
    /// Minimum shot length before a framing cut is allowed, in seconds
    #[serde(default = "default_min_shot_secs")]
    pub min_shot_secs: f64,
    /// Horizontal drift (pixels) that counts as a framing change
    #[serde(default = "default_jump_threshold_px")]
    pub shot_jump_threshold_px: u32,
}

fn default_sample_fps() -> f64 {
    2.0
}

fn default_smoothing_window_secs() -> f64 {
    2.0
}

fn default_min_shot_secs() -> f64 {
    3.0
}

fn default_jump_threshold_px() -> u32 {
    250
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            sample_fps: default_sample_fps(),
            smoothing_window_secs: default_smoothing_window_secs(),
            min_shot_secs: default_min_shot_secs(),
            shot_jump_threshold_px: default_jump_threshold_px(),
        }
    }
}

/// Default encode request parameters sent to the transcoder
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EncodeSettings {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Output resolution width (default 1080)
    #[serde(default = "default_output_width")]
    pub output_width: u32,
    /// Output resolution height (default 1920)
    #[serde(default = "default_output_height")]
    pub output_height: u32,
    /// Hard cap on any single external-tool invocation, in seconds
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_crf() -> u32 {
    18
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u32 {
    2
}

fn default_output_width() -> u32 {
    1080
}

fn default_output_height() -> u32 {
    1920
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            output_width: default_output_width(),
            output_height: default_output_height(),
            tool_timeout_secs: None,
        }
    }
}

/// Application configuration stored in settings.json
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// OpenAI-compatible API key
    pub openai_api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    /// Subtitle language required from the source video
    #[serde(default = "default_subtitle_lang")]
    pub subtitle_lang: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    /// Whether to use cookies for yt-dlp
    #[serde(default)]
    pub use_cookies: bool,
    /// Path to the cookies file
    #[serde(default = "default_cookies_path")]
    pub cookies_path: String,
    /// Font file used for the hook text overlay; ffmpeg picks a system
    /// default when unset
    #[serde(default)]
    pub hook_font: Option<String>,
    #[serde(default)]
    pub crop: CropSettings,
    #[serde(default)]
    pub encode: EncodeSettings,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_completion_model() -> String {
    "gpt-4.1".to_string()
}

fn default_tts_voice() -> String {
    "nova".to_string()
}

fn default_subtitle_lang() -> String {
    "en".to_string()
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_cookies_path() -> String {
    "./cookies.json".to_string()
}

impl AppConfig {
    /// Configuration file name
    const CONFIG_FILE: &'static str = "settings.json";

    /// Candidate configuration paths: working directory first, then the
    /// per-user config directory.
    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(Self::CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("auto-clipper").join(Self::CONFIG_FILE));
        }
        paths
    }

    /// Load configuration from the first settings.json found
    pub fn load() -> Result<Self> {
        let path = Self::candidate_paths()
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                anyhow::anyhow!("Configuration file not found. Please create settings.json")
            })?;

        let content = fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;

        if config.openai_api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "No API key found in configuration. Please set openai_api_key in settings.json"
            ));
        }

        Ok(config)
    }

    /// Create a default configuration file in the working directory
    pub fn create_default() -> Result<()> {
        let default_config = AppConfig {
            openai_api_key: String::new(),
            api_base: default_api_base(),
            completion_model: default_completion_model(),
            tts_voice: default_tts_voice(),
            subtitle_lang: default_subtitle_lang(),
            output_dir: default_output_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            ytdlp_path: default_ytdlp_path(),
            use_cookies: false,
            cookies_path: default_cookies_path(),
            hook_font: None,
            crop: CropSettings::default(),
            encode: EncodeSettings::default(),
        };

        let json = serde_json::to_string_pretty(&default_config)?;
        fs::write(Self::CONFIG_FILE, json)?;

        Ok(())
    }

    /// Save configuration to the working-directory settings.json
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(Self::CONFIG_FILE, json)?;
        Ok(())
    }

    /// Ensure output directory exists
    pub fn ensure_output_dir(&self) -> Result<()> {
        if !Path::new(&self.output_dir).exists() {
            fs::create_dir_all(&self.output_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig {
            openai_api_key: "test-key".to_string(),
            api_base: default_api_base(),
            completion_model: default_completion_model(),
            tts_voice: default_tts_voice(),
            subtitle_lang: "id".to_string(),
            output_dir: "./output".to_string(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            ytdlp_path: default_ytdlp_path(),
            use_cookies: false,
            cookies_path: default_cookies_path(),
            hook_font: None,
            crop: CropSettings::default(),
            encode: EncodeSettings::default(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.openai_api_key, "test-key");
        assert_eq!(parsed.subtitle_lang, "id");
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let parsed: AppConfig = serde_json::from_str(r#"{"openai_api_key": "k"}"#).unwrap();
        assert_eq!(parsed.completion_model, "gpt-4.1");
        assert_eq!(parsed.tts_voice, "nova");
        assert_eq!(parsed.subtitle_lang, "en");
        assert_eq!(parsed.encode.crf, 18);
        assert_eq!(parsed.encode.output_width, 1080);
        assert_eq!(parsed.encode.output_height, 1920);
        assert!(parsed.encode.tool_timeout_secs.is_none());
    }

    #[test]
    fn test_crop_settings_defaults() {
        let crop = CropSettings::default();
        assert_eq!(crop.smoothing_window_secs, 2.0);
        assert_eq!(crop.min_shot_secs, 3.0);
        assert_eq!(crop.shot_jump_threshold_px, 250);
    }
}
