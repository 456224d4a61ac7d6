//! Hook composer module for Auto Clipper
//! Synthesizes a spoken teaser for a clip, renders it as a freeze-frame
//! intro with the hook text overlaid, and concatenates it ahead of the
//! clip. Returns the measured hook duration so caption timestamps can be
//! shifted downstream.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::ai::TextToSpeech;
use crate::config::EncodeSettings;
use crate::error::{ClipperError, Result};
use crate::state::RunState;
use crate::video::{EncodeProfile, MediaEngine, TextStyle};

/// Max words per overlay line
pub const HOOK_WORDS_PER_LINE: usize = 3;
/// Used when the synthesized audio cannot be probed
pub const FALLBACK_HOOK_SECONDS: f64 = 3.0;
/// Breathing room added after the spoken hook
const TTS_PAD_SECONDS: f64 = 0.5;

pub struct HookComposer {
    tts: Arc<dyn TextToSpeech>,
    engine: Arc<dyn MediaEngine>,
    voice: String,
    style: TextStyle,
    encode: EncodeSettings,
}

impl HookComposer {
    pub fn new(
        tts: Arc<dyn TextToSpeech>,
        engine: Arc<dyn MediaEngine>,
        voice: impl Into<String>,
        style: TextStyle,
        encode: EncodeSettings,
    ) -> Self {
        Self {
            tts,
            engine,
            voice: voice.into(),
            style,
            encode,
        }
    }

    /// Build `work_dir/temp_hooked.mp4` = hook segment + re-encoded clip.
    /// Returns the output path and the hook duration in seconds.
    pub async fn compose(
        &self,
        clip: &Path,
        hook_text: &str,
        work_dir: &Path,
        state: &RunState,
    ) -> Result<(PathBuf, f64)> {
        state.add_synthesized_characters(hook_text.chars().count() as u64);
        let audio = self.tts.synthesize(hook_text, &self.voice).await?;

        let tts_path = work_dir.join("hook_tts.mp3");
        tokio::fs::write(&tts_path, &audio).await?;

        let duration = match self.engine.probe_duration(&tts_path).await {
            Ok(probed) => probed + TTS_PAD_SECONDS,
            Err(ClipperError::Cancelled) => return Err(ClipperError::Cancelled),
            Err(e) => {
                warn!("could not probe hook audio, using fallback duration: {}", e);
                FALLBACK_HOOK_SECONDS
            }
        };

        // The hook segment and the clip must come out byte-compatible for
        // the stream-copy concat, so both use the clip's own geometry.
        let info = self.engine.probe(clip).await?;
        let profile = EncodeProfile::from_settings(&self.encode, info.width, info.height, info.fps);

        let lines = wrap_hook_lines(hook_text, HOOK_WORDS_PER_LINE);
        let hook_segment = work_dir.join("hook_segment.mp4");
        self.engine
            .freeze_frame(
                clip,
                &tts_path,
                &lines,
                duration,
                &self.style,
                &profile,
                &hook_segment,
            )
            .await?;

        let main_reencoded = work_dir.join("hook_main.mp4");
        self.engine.reencode(clip, &profile, &main_reencoded).await?;

        let output = work_dir.join("temp_hooked.mp4");
        let segments = vec![hook_segment.clone(), main_reencoded.clone()];
        if let Err(e) = self.engine.concat_copy(&segments, &output).await {
            match e {
                ClipperError::Cancelled => return Err(e),
                _ => {
                    warn!("stream-copy concat failed, re-encoding both inputs: {}", e);
                    self.engine.concat_filter(&segments, &profile, &output).await?;
                }
            }
        }

        for temp in [&tts_path, &hook_segment, &main_reencoded] {
            let _ = tokio::fs::remove_file(temp).await;
        }

        info!("hook composed ({:.1}s)", duration);
        Ok((output, duration))
    }
}

/// Uppercase the hook text and wrap it into lines of at most `max_words`
pub fn wrap_hook_lines(text: &str, max_words: usize) -> Vec<String> {
    let upper = text.to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_hook_lines_three_words_per_line() {
        let lines = wrap_hook_lines("this guest said something truly wild today", 3);
        assert_eq!(
            lines,
            vec!["THIS GUEST SAID", "SOMETHING TRULY WILD", "TODAY"]
        );
    }

    #[test]
    fn test_wrap_hook_lines_short_text() {
        assert_eq!(wrap_hook_lines("no way", 3), vec!["NO WAY"]);
        assert!(wrap_hook_lines("", 3).is_empty());
    }

    #[test]
    fn test_wrap_hook_lines_collapses_whitespace() {
        let lines = wrap_hook_lines("  spaced   out   text  ", 2);
        assert_eq!(lines, vec!["SPACED OUT", "TEXT"]);
    }
}
