//! Clip pipeline orchestrator for Auto Clipper
//! Drives download → transcript → highlight selection → per-clip synthesis
//! with staged progress reporting, cooperative cancellation and scoped
//! cleanup of per-run artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::ai::{CompletionModel, SpeechToText, TextToSpeech};
use crate::captions::CaptionBuilder;
use crate::config::{CropSettings, EncodeSettings};
use crate::downloader::Downloader;
use crate::error::{ClipperError, Result};
use crate::highlights::HighlightSelector;
use crate::hook::HookComposer;
use crate::state::{ProgressFn, RunState};
use crate::tracking::{CropPlanner, CropTrack, FaceDetector};
use crate::transcript;
use crate::types::{ClipMetadata, ClipResult, Highlight};
use crate::video::{EncodeProfile, MediaEngine, TextStyle};

/// Per-clip steps reported between the cut and the finished master
const CLIP_STEPS: f64 = 5.0;

/// Per-highlight unit of work. Lives from the moment the orchestrator picks
/// the highlight up until its artifacts are finished or discarded.
struct ClipJob<'a> {
    index: usize,
    total: usize,
    highlight: &'a Highlight,
    source: &'a Path,
    clip_dir: PathBuf,
}

/// Everything the pipeline needs beyond its collaborators
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub subtitle_lang: String,
    pub tts_voice: String,
    pub hook_style: TextStyle,
    pub crop: CropSettings,
    pub encode: EncodeSettings,
}

/// Top-level orchestrator. One `process()` call is one run; stages execute
/// strictly in sequence and share no state beyond `RunState`.
pub struct ClipPipeline {
    downloader: Arc<dyn Downloader>,
    engine: Arc<dyn MediaEngine>,
    detector: Arc<dyn FaceDetector>,
    completion: Arc<dyn CompletionModel>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    settings: PipelineSettings,
    state: Arc<RunState>,
    progress: ProgressFn,
}

impl ClipPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        downloader: Arc<dyn Downloader>,
        engine: Arc<dyn MediaEngine>,
        detector: Arc<dyn FaceDetector>,
        completion: Arc<dyn CompletionModel>,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        settings: PipelineSettings,
        state: Arc<RunState>,
        progress: ProgressFn,
    ) -> Self {
        Self {
            downloader,
            engine,
            detector,
            completion,
            stt,
            tts,
            settings,
            state,
            progress,
        }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Run the whole pipeline for one source video. Per-run temp artifacts
    /// are removed whatever the outcome; if the cancellation flag is set,
    /// the run reports `Cancelled` even when another error fired first.
    pub async fn process(&self, url: &str, num_clips: usize) -> Result<Vec<ClipResult>> {
        self.state.reset();
        let temp_dir = self.settings.output_dir.join("_temp");
        tokio::fs::create_dir_all(&temp_dir).await?;

        let outcome = self.run(url, num_clips, &temp_dir).await;

        self.report("Cleaning up...", 0.95);
        if let Err(e) = tokio::fs::remove_dir_all(&temp_dir).await {
            warn!("could not remove temp dir: {}", e);
        }

        let outcome = match outcome {
            Err(_) if self.state.is_cancelled() => Err(ClipperError::Cancelled),
            other => other,
        };

        if let Ok(results) = &outcome {
            self.report("Complete", 1.0);
            info!("created {} clips in {}", results.len(), self.settings.output_dir.display());
        }

        outcome
    }

    async fn run(
        &self,
        url: &str,
        num_clips: usize,
        temp_dir: &Path,
    ) -> Result<Vec<ClipResult>> {
        self.check_cancelled()?;
        self.report("Downloading video...", 0.05);
        let download = self
            .downloader
            .fetch(url, temp_dir, &|fraction: f64| {
                let overall = 0.05 + fraction.clamp(0.0, 1.0) * 0.20;
                let effective = self.state.set_progress(overall);
                (self.progress)("Downloading video...", effective);
            })
            .await?;

        let subtitle = download
            .subtitle_path
            .as_ref()
            .ok_or_else(|| ClipperError::NoTranscript {
                lang: self.settings.subtitle_lang.clone(),
            })?;

        self.check_cancelled()?;
        self.report("Reading transcript...", 0.28);
        let spans = transcript::load_srt(subtitle)?;
        let transcript_text = transcript::to_prompt_text(&spans);

        self.check_cancelled()?;
        self.report("Finding highlights...", 0.30);
        let selector = HighlightSelector::new(self.completion.clone());
        let highlights = selector
            .select(&transcript_text, &download.metadata, num_clips, &self.state)
            .await?;
        if highlights.is_empty() {
            return Err(ClipperError::NoHighlights);
        }

        let total = highlights.len();
        let mut results = Vec::with_capacity(total);
        for (i, highlight) in highlights.iter().enumerate() {
            self.check_cancelled()?;
            results.push(
                self.process_clip(&download.video_path, highlight, i + 1, total)
                    .await?,
            );
        }

        Ok(results)
    }

    /// One clip, in its own output directory. A failed chain discards the
    /// job's temp artifacts before the error propagates.
    async fn process_clip(
        &self,
        source: &Path,
        highlight: &Highlight,
        index: usize,
        total: usize,
    ) -> Result<ClipResult> {
        let dir_name = format!(
            "{}{:02}",
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            index
        );
        let job = ClipJob {
            index,
            total,
            highlight,
            source,
            clip_dir: self.settings.output_dir.join(dir_name),
        };
        tokio::fs::create_dir_all(&job.clip_dir).await?;

        let outcome = self.clip_chain(&job).await;
        if outcome.is_err() {
            discard_workspace(&job.clip_dir).await;
        }
        outcome
    }

    async fn clip_chain(&self, job: &ClipJob<'_>) -> Result<ClipResult> {
        let ClipJob {
            index,
            total,
            highlight,
            source,
            clip_dir,
        } = job;
        let (index, total) = (*index, *total);
        info!("[clip {}/{}] {}", index, total, highlight.title);

        // Step 1: cut the highlight out of the source
        self.check_cancelled()?;
        self.clip_progress("Cutting clip...", index, total, 0);
        let start = transcript::parse_timestamp(&highlight.start_time)?;
        let end = transcript::parse_timestamp(&highlight.end_time)?;
        let source_info = self.engine.probe(source).await?;
        let cut_profile = EncodeProfile::from_settings(
            &self.settings.encode,
            source_info.width,
            source_info.height,
            source_info.fps,
        );
        let landscape = clip_dir.join("temp_landscape.mp4");
        self.engine
            .cut(source, start, end, &cut_profile, &landscape)
            .await?;

        // Step 2: track the speaker and plan the crop path
        self.check_cancelled()?;
        self.clip_progress("Tracking speaker...", index, total, 1);
        let info = self.engine.probe(&landscape).await?;
        let crop_width = (info.height as f64 * 9.0 / 16.0) as u32;
        let signal = self.detector.scan(&landscape, &info).await?;
        let sample_fps = if signal.sample_fps > 0.0 {
            signal.sample_fps
        } else {
            1.0
        };
        let planner = CropPlanner::from_settings(&self.settings.crop, sample_fps);
        let mut offsets = planner.plan(&signal.frames, info.width, crop_width);
        if offsets.is_empty() {
            // No analyzable frames at all still yields a centered crop
            offsets.push((info.width - crop_width) / 2);
        }
        let track = CropTrack {
            offsets,
            sample_fps,
            crop_width,
            crop_height: info.height,
        };

        // Step 3: render the stabilized portrait clip
        self.check_cancelled()?;
        self.clip_progress("Converting to portrait...", index, total, 2);
        let portrait = clip_dir.join("temp_portrait.mp4");
        let portrait_profile = EncodeProfile::from_settings(
            &self.settings.encode,
            self.settings.encode.output_width,
            self.settings.encode.output_height,
            info.fps,
        );
        self.engine
            .render_crop_track(&landscape, &track, &portrait_profile, &portrait)
            .await?;

        // Step 4: prepend the hook
        self.check_cancelled()?;
        self.clip_progress("Adding hook...", index, total, 3);
        let hook_text = if highlight.hook_text.is_empty() {
            highlight.title.clone()
        } else {
            highlight.hook_text.clone()
        };
        let composer = HookComposer::new(
            self.tts.clone(),
            self.engine.clone(),
            self.settings.tts_voice.clone(),
            self.settings.hook_style.clone(),
            self.settings.encode.clone(),
        );
        let (hooked, hook_duration) = composer
            .compose(&portrait, &hook_text, clip_dir, &self.state)
            .await?;

        // Step 5: burn captions, offset past the hook
        self.check_cancelled()?;
        self.clip_progress("Burning captions...", index, total, 4);
        let master = clip_dir.join("master.mp4");
        let captions = CaptionBuilder::new(
            self.stt.clone(),
            self.engine.clone(),
            self.settings.subtitle_lang.clone(),
            self.settings.encode.clone(),
        );
        captions
            .apply(&hooked, &portrait, hook_duration, &master, clip_dir, &self.state)
            .await?;

        self.clip_progress("Done", index, total, 5);

        for temp in [&landscape, &portrait, &hooked] {
            let _ = tokio::fs::remove_file(temp).await;
        }

        let metadata = ClipMetadata {
            title: highlight.title.clone(),
            hook_text,
            start_time: highlight.start_time.clone(),
            end_time: highlight.end_time.clone(),
            duration_seconds: highlight.duration_seconds,
        };
        let metadata_path = clip_dir.join("data.json");
        tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?).await?;

        Ok(ClipResult {
            index,
            title: highlight.title.clone(),
            video_path: master,
            metadata_path,
            duration_seconds: highlight.duration_seconds,
            hook_duration,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.state.is_cancelled() {
            Err(ClipperError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn report(&self, stage: &str, fraction: f64) {
        let effective = self.state.set_progress(fraction);
        (self.progress)(stage, effective);
    }

    /// Clip work occupies the 0.3..0.9 progress band, split evenly
    fn clip_progress(&self, stage: &str, index: usize, total: usize, step: usize) {
        let base = 0.3 + 0.6 * (index - 1) as f64 / total as f64;
        let portion = 0.6 / total as f64;
        let overall = base + portion * (step as f64 / CLIP_STEPS);
        let label = format!("Clip {}/{}: {}", index, total, stage);
        let effective = self.state.set_progress(overall);
        (self.progress)(&label, effective);
    }
}

/// Drop a failed clip's workspace: temp artifacts always, the whole
/// directory when no master was produced.
async fn discard_workspace(clip_dir: &Path) {
    if !clip_dir.join("master.mp4").exists() {
        if let Err(e) = tokio::fs::remove_dir_all(clip_dir).await {
            warn!("could not discard {}: {}", clip_dir.display(), e);
        }
        return;
    }

    if let Ok(mut entries) = tokio::fs::read_dir(clip_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("temp_") || name.starts_with("hook_") || name == "captions.ass" {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Completion, SegmentSpan, TokenUsage, Transcription, WordSpan};
    use crate::downloader::DownloadResult;
    use crate::state::CancelToken;
    use crate::tracking::FaceSignal;
    use crate::types::{MediaInfo, VideoMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeDownloader {
        with_subtitle: bool,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn fetch(
            &self,
            _url: &str,
            work_dir: &Path,
            progress: &(dyn Fn(f64) + Send + Sync),
        ) -> Result<DownloadResult> {
            let video_path = work_dir.join("source.mp4");
            tokio::fs::write(&video_path, b"source").await?;
            progress(0.5);
            progress(1.0);

            let subtitle_path = if self.with_subtitle {
                let path = work_dir.join("source.en.srt");
                tokio::fs::write(
                    &path,
                    "1\n00:00:10,000 --> 00:01:50,000\nA long and fascinating story\n\n",
                )
                .await?;
                Some(path)
            } else {
                None
            };

            Ok(DownloadResult {
                video_path,
                subtitle_path,
                metadata: VideoMetadata::default(),
            })
        }
    }

    #[derive(Default)]
    struct CallLog {
        cuts: AtomicUsize,
        renders: AtomicUsize,
        burns: AtomicUsize,
    }

    struct FakeEngine {
        calls: Arc<CallLog>,
        cancel_on_cut: Option<(usize, CancelToken)>,
    }

    async fn touch(path: &Path) -> Result<()> {
        tokio::fs::write(path, b"media").await?;
        Ok(())
    }

    #[async_trait]
    impl MediaEngine for FakeEngine {
        async fn probe(&self, _input: &Path) -> Result<MediaInfo> {
            Ok(MediaInfo {
                duration: 100.0,
                width: 1920,
                height: 1080,
                fps: 30.0,
            })
        }

        async fn probe_duration(&self, _input: &Path) -> Result<f64> {
            Ok(2.5)
        }

        async fn cut(
            &self,
            _input: &Path,
            _start: f64,
            _end: f64,
            _profile: &EncodeProfile,
            output: &Path,
        ) -> Result<()> {
            let n = self.calls.cuts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, token)) = &self.cancel_on_cut {
                if n == *at {
                    token.cancel();
                }
            }
            touch(output).await
        }

        async fn render_crop_track(
            &self,
            _input: &Path,
            _track: &CropTrack,
            _profile: &EncodeProfile,
            output: &Path,
        ) -> Result<()> {
            self.calls.renders.fetch_add(1, Ordering::SeqCst);
            touch(output).await
        }

        async fn freeze_frame(
            &self,
            _input: &Path,
            _audio: &Path,
            _lines: &[String],
            _duration: f64,
            _style: &TextStyle,
            _profile: &EncodeProfile,
            output: &Path,
        ) -> Result<()> {
            touch(output).await
        }

        async fn reencode(
            &self,
            _input: &Path,
            _profile: &EncodeProfile,
            output: &Path,
        ) -> Result<()> {
            touch(output).await
        }

        async fn concat_copy(&self, _inputs: &[PathBuf], output: &Path) -> Result<()> {
            touch(output).await
        }

        async fn concat_filter(
            &self,
            _inputs: &[PathBuf],
            _profile: &EncodeProfile,
            output: &Path,
        ) -> Result<()> {
            touch(output).await
        }

        async fn extract_audio(
            &self,
            _input: &Path,
            _sample_rate: u32,
            output: &Path,
        ) -> Result<()> {
            tokio::fs::write(output, vec![0u8; 4000]).await?;
            Ok(())
        }

        async fn burn_subtitles(
            &self,
            _input: &Path,
            _subtitles: &Path,
            _profile: &EncodeProfile,
            output: &Path,
        ) -> Result<()> {
            self.calls.burns.fetch_add(1, Ordering::SeqCst);
            touch(output).await
        }
    }

    struct FakeDetector;

    #[async_trait]
    impl FaceDetector for FakeDetector {
        async fn scan(&self, _video: &Path, _info: &MediaInfo) -> Result<FaceSignal> {
            Ok(FaceSignal {
                frames: vec![Vec::new(); 20],
                sample_fps: 2.0,
            })
        }
    }

    struct FakeCompletion {
        text: String,
    }

    #[async_trait]
    impl CompletionModel for FakeCompletion {
        async fn complete(&self, _prompt: &str) -> Result<Completion> {
            Ok(Completion {
                text: self.text.clone(),
                usage: TokenUsage {
                    prompt_tokens: 500,
                    completion_tokens: 80,
                },
            })
        }
    }

    struct FakeStt;

    #[async_trait]
    impl SpeechToText for FakeStt {
        async fn transcribe(&self, _audio: Vec<u8>, _language: &str) -> Result<Transcription> {
            Ok(Transcription {
                words: vec![
                    WordSpan {
                        word: "hello".to_string(),
                        start: 0.0,
                        end: 0.4,
                    },
                    WordSpan {
                        word: "world".to_string(),
                        start: 0.5,
                        end: 0.9,
                    },
                ],
                segments: vec![SegmentSpan {
                    text: "hello world".to_string(),
                    start: 0.0,
                    end: 0.9,
                }],
            })
        }
    }

    struct FakeTts;

    #[async_trait]
    impl TextToSpeech for FakeTts {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>> {
            Ok(vec![0u8; 64])
        }
    }

    fn candidate(start: &str, end: &str, title: &str) -> String {
        format!(
            r#"{{"start_time": "{start}", "end_time": "{end}", "title": "{title}", "reason": "r", "hook_text": "watch this now"}}"#
        )
    }

    struct Harness {
        pipeline: ClipPipeline,
        calls: Arc<CallLog>,
        fractions: Arc<Mutex<Vec<f64>>>,
        output_dir: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(
        completion_payload: String,
        with_subtitle: bool,
        cancel_on_cut: Option<usize>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("output");
        std::fs::create_dir_all(&output_dir).unwrap();

        let cancel = CancelToken::new();
        let calls = Arc::new(CallLog::default());
        let engine = Arc::new(FakeEngine {
            calls: calls.clone(),
            cancel_on_cut: cancel_on_cut.map(|n| (n, cancel.clone())),
        });

        let fractions: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let fractions_sink = fractions.clone();
        let progress: ProgressFn = Box::new(move |_stage, fraction| {
            fractions_sink.lock().unwrap().push(fraction);
        });

        let settings = PipelineSettings {
            output_dir: output_dir.clone(),
            subtitle_lang: "en".to_string(),
            tts_voice: "nova".to_string(),
            hook_style: TextStyle::default(),
            crop: CropSettings::default(),
            encode: EncodeSettings::default(),
        };

        let pipeline = ClipPipeline::new(
            Arc::new(FakeDownloader { with_subtitle }),
            engine,
            Arc::new(FakeDetector),
            Arc::new(FakeCompletion {
                text: completion_payload,
            }),
            Arc::new(FakeStt),
            Arc::new(FakeTts),
            settings,
            Arc::new(RunState::new(cancel)),
            progress,
        );

        Harness {
            pipeline,
            calls,
            fractions,
            output_dir,
            _dir: dir,
        }
    }

    fn clip_dirs(output_dir: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(output_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.file_name().and_then(|n| n.to_str()) != Some("_temp"))
            .collect();
        dirs.sort();
        dirs
    }

    #[tokio::test]
    async fn test_end_to_end_single_clip() {
        // One in-bounds candidate (100s) and one reject (30s)
        let payload = format!(
            "[{},{}]",
            candidate("00:00:10,000", "00:01:50,000", "The story"),
            candidate("00:02:00,000", "00:02:30,000", "Too short"),
        );
        let h = harness(payload, true, None);

        let results = h.pipeline.process("https://example.com/v", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "The story");
        assert_eq!(results[0].duration_seconds, 100.0);
        assert_eq!(results[0].hook_duration, 3.0);
        assert!(results[0].video_path.exists());

        let metadata: ClipMetadata =
            serde_json::from_str(&std::fs::read_to_string(&results[0].metadata_path).unwrap())
                .unwrap();
        assert_eq!(metadata.duration_seconds, 100.0);
        assert_eq!(metadata.start_time, "00:00:10,000");

        // Temp dir is gone, temp clip artifacts are gone
        assert!(!h.output_dir.join("_temp").exists());
        let dirs = clip_dirs(&h.output_dir);
        assert_eq!(dirs.len(), 1);
        assert!(!dirs[0].join("temp_landscape.mp4").exists());
        assert!(!dirs[0].join("temp_portrait.mp4").exists());
        assert!(!dirs[0].join("temp_hooked.mp4").exists());

        // Progress never decreased and finished at 1.0
        let fractions = h.fractions.lock().unwrap();
        assert!(fractions.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*fractions.last().unwrap(), 1.0);

        // Usage was accumulated from every collaborator
        let usage = h.pipeline.state().usage();
        assert_eq!(usage.prompt_tokens, 500);
        assert_eq!(usage.transcribed_audio_seconds, 2.5);
        assert_eq!(usage.synthesized_characters, "watch this now".chars().count() as u64);
    }

    #[tokio::test]
    async fn test_cancellation_mid_run_keeps_finished_clips_only() {
        let payload = format!(
            "[{},{},{}]",
            candidate("00:00:10,000", "00:01:40,000", "one"),
            candidate("00:02:00,000", "00:03:30,000", "two"),
            candidate("00:04:00,000", "00:05:30,000", "three"),
        );
        // Cancellation fires during clip 2's cut
        let h = harness(payload, true, Some(2));

        let result = h.pipeline.process("https://example.com/v", 3).await;
        assert!(matches!(result, Err(ClipperError::Cancelled)));

        // Clip 1 survives complete; clip 2's workspace was discarded;
        // clip 3 never started
        let dirs = clip_dirs(&h.output_dir);
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].join("master.mp4").exists());
        assert!(dirs[0].join("data.json").exists());
        assert_eq!(h.calls.cuts.load(Ordering::SeqCst), 2);
        assert_eq!(h.calls.burns.load(Ordering::SeqCst), 1);

        // Cleanup still ran
        assert!(!h.output_dir.join("_temp").exists());
    }

    #[tokio::test]
    async fn test_missing_subtitle_is_fatal() {
        let h = harness("[]".to_string(), false, None);
        let result = h.pipeline.process("https://example.com/v", 1).await;
        assert!(matches!(result, Err(ClipperError::NoTranscript { .. })));
    }

    #[tokio::test]
    async fn test_zero_valid_highlights_is_fatal() {
        // Every candidate is under the duration floor
        let payload = format!("[{}]", candidate("00:00:10,000", "00:00:40,000", "short"));
        let h = harness(payload, true, None);
        let result = h.pipeline.process("https://example.com/v", 1).await;
        assert!(matches!(result, Err(ClipperError::NoHighlights)));
        assert_eq!(h.calls.cuts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_model_payload_is_fatal() {
        let h = harness("sure, here are the clips".to_string(), true, None);
        let result = h.pipeline.process("https://example.com/v", 1).await;
        assert!(matches!(result, Err(ClipperError::MalformedResponse { .. })));
    }
}
