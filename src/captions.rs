//! Caption timeline module for Auto Clipper
//! Produces word-synchronized caption events from the clip audio and burns
//! them in as an ASS track with the active word highlighted. Caption
//! failures degrade to an uncaptioned clip instead of aborting the run.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::ai::{SegmentSpan, SpeechToText, WordSpan};
use crate::config::EncodeSettings;
use crate::error::{ClipperError, Result};
use crate::state::RunState;
use crate::video::{EncodeProfile, MediaEngine};

/// Words shown together on screen
pub const WORDS_PER_CHUNK: usize = 4;
/// Sample rate requested from the audio extraction
pub const STT_SAMPLE_RATE: u32 = 16_000;
/// Extracted audio smaller than this is treated as silence
const MIN_AUDIO_BYTES: u64 = 1000;

/// One timestamped on-screen text unit. `highlight` indexes the active
/// word inside `words`, when word timing was available.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionEvent {
    pub start: f64,
    pub end: f64,
    pub words: Vec<String>,
    pub highlight: Option<usize>,
}

pub struct CaptionBuilder {
    stt: Arc<dyn SpeechToText>,
    engine: Arc<dyn MediaEngine>,
    language: String,
    encode: EncodeSettings,
}

impl CaptionBuilder {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        engine: Arc<dyn MediaEngine>,
        language: impl Into<String>,
        encode: EncodeSettings,
    ) -> Self {
        Self {
            stt,
            engine,
            language: language.into(),
            encode,
        }
    }

    /// Burn captions for `hooked` into `output`. The transcription reads
    /// from `audio_source` (the clip without the hook); `time_offset` is
    /// the hook duration and shifts every event. Non-cancellation failures
    /// fall back to copying the input through uncaptioned.
    pub async fn apply(
        &self,
        hooked: &Path,
        audio_source: &Path,
        time_offset: f64,
        output: &Path,
        work_dir: &Path,
        state: &RunState,
    ) -> Result<()> {
        match self
            .try_captions(hooked, audio_source, time_offset, output, work_dir, state)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!("no caption events produced, copying clip through");
                tokio::fs::copy(hooked, output).await?;
                Ok(())
            }
            Err(ClipperError::Cancelled) => Err(ClipperError::Cancelled),
            Err(e) => {
                warn!("captioning failed, producing uncaptioned clip: {}", e);
                tokio::fs::copy(hooked, output).await?;
                Ok(())
            }
        }
    }

    async fn try_captions(
        &self,
        hooked: &Path,
        audio_source: &Path,
        time_offset: f64,
        output: &Path,
        work_dir: &Path,
        state: &RunState,
    ) -> Result<bool> {
        let wav_path = work_dir.join("captions_audio.wav");
        self.engine
            .extract_audio(audio_source, STT_SAMPLE_RATE, &wav_path)
            .await?;

        let audio_size = tokio::fs::metadata(&wav_path).await?.len();
        if audio_size < MIN_AUDIO_BYTES {
            warn!("extracted audio is only {} bytes, skipping captions", audio_size);
            let _ = tokio::fs::remove_file(&wav_path).await;
            return Ok(false);
        }

        if let Ok(seconds) = self.engine.probe_duration(&wav_path).await {
            state.add_audio_seconds(seconds);
        }

        let audio = tokio::fs::read(&wav_path).await?;
        let transcription = self.stt.transcribe(audio, &self.language).await;
        let _ = tokio::fs::remove_file(&wav_path).await;
        let transcription = transcription?;

        let events = if !transcription.words.is_empty() {
            build_events(&transcription.words, time_offset)
        } else {
            segment_events(&transcription.segments, time_offset)
        };
        if events.is_empty() {
            return Ok(false);
        }

        let ass_path = work_dir.join("captions.ass");
        tokio::fs::write(&ass_path, render_ass(&events)).await?;

        let info = self.engine.probe(hooked).await?;
        let profile = EncodeProfile::from_settings(&self.encode, info.width, info.height, info.fps);
        let burn = self
            .engine
            .burn_subtitles(hooked, &ass_path, &profile, output)
            .await;
        let _ = tokio::fs::remove_file(&ass_path).await;
        burn?;

        info!("burned {} caption events", events.len());
        Ok(true)
    }
}

/// Word-level events: chunks of `WORDS_PER_CHUNK` words, one event per word
/// spanning exactly that word's time, with the word marked for highlight.
pub fn build_events(words: &[WordSpan], time_offset: f64) -> Vec<CaptionEvent> {
    let mut events = Vec::with_capacity(words.len());
    for chunk in words.chunks(WORDS_PER_CHUNK) {
        let chunk_words: Vec<String> = chunk
            .iter()
            .map(|w| w.word.trim().to_uppercase())
            .collect();
        for (position, word) in chunk.iter().enumerate() {
            events.push(CaptionEvent {
                start: word.start + time_offset,
                end: word.end + time_offset,
                words: chunk_words.clone(),
                highlight: Some(position),
            });
        }
    }
    events
}

/// Segment-level fallback: one event per segment, no word highlight
pub fn segment_events(segments: &[SegmentSpan], time_offset: f64) -> Vec<CaptionEvent> {
    segments
        .iter()
        .filter_map(|segment| {
            let words: Vec<String> = segment
                .text
                .split_whitespace()
                .map(|w| w.to_uppercase())
                .collect();
            if words.is_empty() {
                return None;
            }
            Some(CaptionEvent {
                start: segment.start + time_offset,
                end: segment.end + time_offset,
                words,
                highlight: None,
            })
        })
        .collect()
}

const ASS_HEADER: &str = "[Script Info]\nTitle: Auto-generated captions\nScriptType: v4.00+\nWrapStyle: 0\nPlayResX: 1080\nPlayResY: 1920\nScaledBorderAndShadow: yes\n\n[V4+ Styles]\nFormat: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\nStyle: Default,Arial Black,65,&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,4,2,2,50,50,400,1\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n";

/// Render events as an ASS subtitle track. The active word is wrapped in a
/// yellow color override, the rest stays white.
pub fn render_ass(events: &[CaptionEvent]) -> String {
    let mut content = String::from(ASS_HEADER);

    for event in events {
        let text = event
            .words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                if event.highlight == Some(i) {
                    format!("{{\\c&H00FFFF&}}{}{{\\c&HFFFFFF&}}", word)
                } else {
                    word.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        content.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
            format_ass_time(event.start),
            format_ass_time(event.end),
            text
        ));
    }

    content
}

/// Seconds to ASS time (H:MM:SS.CC)
fn format_ass_time(seconds: f64) -> String {
    let clamped = seconds.max(0.0);
    let total = clamped as u64;
    let centis = ((clamped - total as f64) * 100.0) as u64;
    format!(
        "{}:{:02}:{:02}.{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        centis
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64) -> WordSpan {
        WordSpan {
            word: text.to_string(),
            start,
            end,
        }
    }

    fn sample_words() -> Vec<WordSpan> {
        (0..9)
            .map(|i| word(&format!("w{}", i), i as f64 * 0.5, i as f64 * 0.5 + 0.4))
            .collect()
    }

    #[test]
    fn test_build_events_one_per_word() {
        let events = build_events(&sample_words(), 0.0);
        assert_eq!(events.len(), 9);
        // Chunks of four: 4 + 4 + 1
        assert_eq!(events[0].words.len(), 4);
        assert_eq!(events[4].words.len(), 4);
        assert_eq!(events[8].words.len(), 1);
        assert_eq!(events[0].highlight, Some(0));
        assert_eq!(events[3].highlight, Some(3));
        assert_eq!(events[4].highlight, Some(0));
    }

    #[test]
    fn test_events_are_monotonic_and_non_overlapping_within_chunk() {
        let events = build_events(&sample_words(), 0.0);
        for pair in events.windows(2) {
            assert!(pair[1].start >= pair[0].start);
            // Same chunk means the next word starts after this one ends
            if pair[0].words == pair[1].words {
                assert!(pair[1].start >= pair[0].end);
            }
        }
    }

    #[test]
    fn test_time_offset_shifts_every_event_exactly() {
        let words = sample_words();
        let offset = 3.2;
        let events = build_events(&words, offset);
        for (event, word) in events.iter().zip(words.iter()) {
            assert_eq!(event.start, word.start + offset);
            assert_eq!(event.end, word.end + offset);
        }
    }

    #[test]
    fn test_words_are_uppercased() {
        let events = build_events(&[word("hello", 0.0, 0.4)], 0.0);
        assert_eq!(events[0].words, vec!["HELLO"]);
    }

    #[test]
    fn test_segment_fallback() {
        let segments = vec![
            SegmentSpan {
                text: "hello there everyone".to_string(),
                start: 0.0,
                end: 1.5,
            },
            SegmentSpan {
                text: "   ".to_string(),
                start: 1.5,
                end: 2.0,
            },
        ];
        let events = segment_events(&segments, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, 1.0);
        assert_eq!(events[0].words, vec!["HELLO", "THERE", "EVERYONE"]);
        assert_eq!(events[0].highlight, None);
    }

    #[test]
    fn test_render_ass_highlights_active_word() {
        let events = build_events(
            &[word("first", 0.0, 0.4), word("second", 0.5, 0.9)],
            0.0,
        );
        let ass = render_ass(&events);
        assert!(ass.contains("[Script Info]"));
        assert!(ass.contains("PlayResX: 1080"));
        assert!(ass.contains("PlayResY: 1920"));
        assert!(ass.contains("{\\c&H00FFFF&}FIRST{\\c&HFFFFFF&} SECOND"));
        assert!(ass.contains("FIRST {\\c&H00FFFF&}SECOND{\\c&HFFFFFF&}"));
    }

    #[test]
    fn test_render_ass_without_highlight() {
        let events = vec![CaptionEvent {
            start: 0.0,
            end: 1.0,
            words: vec!["PLAIN".to_string(), "TEXT".to_string()],
            highlight: None,
        }];
        let ass = render_ass(&events);
        assert!(ass.contains(",PLAIN TEXT\n"));
        assert!(!ass.contains("\\c&H00FFFF&"));
    }

    #[test]
    fn test_format_ass_time() {
        assert_eq!(format_ass_time(0.0), "0:00:00.00");
        assert_eq!(format_ass_time(1.5), "0:00:01.50");
        assert_eq!(format_ass_time(61.0), "0:01:01.00");
        assert_eq!(format_ass_time(3661.5), "1:01:01.50");
        assert_eq!(format_ass_time(-2.0), "0:00:00.00");
    }
}
