//! Speaker tracking module for Auto Clipper
//! Turns per-frame face detections into a stabilized horizontal crop path
//! for portrait conversion. The path comes out piecewise constant: the
//! virtual camera only cuts between stable framings, it never pans.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use regex::Regex;
use tokio::process::Command;

use crate::config::CropSettings;
use crate::error::{ClipperError, Result};
use crate::state::CancelToken;
use crate::types::{FaceBox, MediaInfo};

/// Face detections for one analyzed clip, one entry per sampled frame
#[derive(Debug, Clone, Default)]
pub struct FaceSignal {
    pub frames: Vec<Vec<FaceBox>>,
    pub sample_fps: f64,
}

/// Detection collaborator: produces the face signal the planner consumes.
/// Boxes are a tracking signal only; no identity is kept across frames.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn scan(&self, video: &Path, info: &MediaInfo) -> Result<FaceSignal>;
}

/// Stabilized crop planner. Window and shot lengths are held as sample
/// counts, derived from the signal's sample rate.
pub struct CropPlanner {
    window: usize,
    min_shot: usize,
    threshold: u32,
}

impl CropPlanner {
    pub fn from_settings(settings: &CropSettings, sample_fps: f64) -> Self {
        let to_samples = |seconds: f64| ((seconds * sample_fps).round() as usize).max(1);
        Self {
            window: to_samples(settings.smoothing_window_secs),
            min_shot: to_samples(settings.min_shot_secs),
            threshold: settings.shot_jump_threshold_px,
        }
    }

    /// Plan one crop offset per analyzed frame. Every offset is clamped to
    /// `[0, source_width - crop_width]`.
    pub fn plan(&self, frames: &[Vec<FaceBox>], source_width: u32, crop_width: u32) -> Vec<u32> {
        let raw = self.track(frames, source_width, crop_width);
        let smoothed = self.smooth(&raw);
        self.lock_shots(&smoothed)
    }

    /// Pass 1: follow the largest detected face, carrying the previous
    /// target forward on frames with no detection.
    fn track(&self, frames: &[Vec<FaceBox>], source_width: u32, crop_width: u32) -> Vec<u32> {
        let max_offset = source_width.saturating_sub(crop_width) as i64;
        let mut target = source_width as f64 / 2.0;
        let mut offsets = Vec::with_capacity(frames.len());

        for boxes in frames {
            if let Some(largest) = largest_box(boxes) {
                target = largest.center_x();
            }
            let offset = (target - crop_width as f64 / 2.0) as i64;
            offsets.push(offset.clamp(0, max_offset) as u32);
        }

        offsets
    }

    /// Pass 2: centered moving-window median. Median rather than mean so a
    /// single-frame false detection cannot drag the path.
    fn smooth(&self, raw: &[u32]) -> Vec<u32> {
        if raw.is_empty() || self.window < 2 {
            return raw.to_vec();
        }

        let half = self.window / 2;
        (0..raw.len())
            .map(|i| {
                let start = i.saturating_sub(half);
                let end = (i + half).min(raw.len());
                median(&raw[start..end.max(i + 1)])
            })
            .collect()
    }

    /// Pass 3: partition into shots and lock every frame of a shot to the
    /// shot's median offset. A boundary needs both the minimum shot length
    /// and a drift beyond the pixel threshold from the shot's first value.
    pub fn lock_shots(&self, smoothed: &[u32]) -> Vec<u32> {
        if smoothed.is_empty() {
            return Vec::new();
        }

        let mut locked = Vec::with_capacity(smoothed.len());
        let mut shot_start = 0usize;

        for i in 1..smoothed.len() {
            if i - shot_start >= self.min_shot
                && smoothed[i].abs_diff(smoothed[shot_start]) > self.threshold
            {
                let shot_median = median(&smoothed[shot_start..i]);
                locked.extend(std::iter::repeat(shot_median).take(i - shot_start));
                shot_start = i;
            }
        }

        // Whatever remains, even if shorter than a full shot, forms the
        // final shot locked to its own median.
        let shot_median = median(&smoothed[shot_start..]);
        locked.extend(std::iter::repeat(shot_median).take(smoothed.len() - shot_start));

        locked
    }
}

/// Largest-area box; the first in scan order wins a tie.
fn largest_box(boxes: &[FaceBox]) -> Option<&FaceBox> {
    let mut best: Option<&FaceBox> = None;
    for candidate in boxes {
        match best {
            Some(current) if candidate.area() <= current.area() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Median with numpy semantics: even windows average the two middle values.
fn median(values: &[u32]) -> u32 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}

/// A planned crop path plus the geometry needed to render it
#[derive(Debug, Clone)]
pub struct CropTrack {
    pub offsets: Vec<u32>,
    pub sample_fps: f64,
    pub crop_width: u32,
    pub crop_height: u32,
}

/// A contiguous run of frames sharing one crop offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropShot {
    pub start: f64,
    pub end: f64,
    pub offset: u32,
}

impl CropTrack {
    /// Collapse the locked path into its piecewise-constant segments.
    pub fn shots(&self) -> Vec<CropShot> {
        let mut shots = Vec::new();
        if self.offsets.is_empty() {
            return shots;
        }

        let step = 1.0 / self.sample_fps;
        let mut run_start = 0usize;
        for i in 1..=self.offsets.len() {
            if i == self.offsets.len() || self.offsets[i] != self.offsets[run_start] {
                shots.push(CropShot {
                    start: run_start as f64 * step,
                    end: i as f64 * step,
                    offset: self.offsets[run_start],
                });
                run_start = i;
            }
        }
        shots
    }

    /// Render the path as a crop-filter x expression over `t`. A single
    /// shot degenerates to a plain number.
    pub fn x_expression(&self) -> String {
        let shots = self.shots();
        match shots.len() {
            0 => "0".to_string(),
            1 => shots[0].offset.to_string(),
            _ => {
                let mut expr = shots[shots.len() - 1].offset.to_string();
                for shot in shots.iter().rev().skip(1) {
                    expr = format!("if(lt(t,{:.3}),{},{})", shot.end, shot.offset, expr);
                }
                format!("'{}'", expr)
            }
        }
    }
}

/// Face-signal source backed by ffmpeg frame sampling. Extracts a couple of
/// frames per sample point and reads the detected content region out of
/// cropdetect; a region much narrower than the frame is treated as the
/// subject box, a full-width region as no detection.
pub struct CropdetectDetector {
    ffmpeg_path: String,
    sample_fps: f64,
    cancel: CancelToken,
}

impl CropdetectDetector {
    pub fn new(ffmpeg_path: impl Into<String>, sample_fps: f64, cancel: CancelToken) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            sample_fps,
            cancel,
        }
    }

    async fn probe_frame(&self, video: &Path, timestamp: f64, info: &MediaInfo) -> Vec<FaceBox> {
        let output = Command::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-ss",
                &format!("{:.3}", timestamp),
                "-i",
                &video.to_string_lossy(),
                "-frames:v",
                "2",
                "-vf",
                "cropdetect=24:16:0",
                "-f",
                "null",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let stderr = match output {
            Ok(out) => String::from_utf8_lossy(&out.stderr).into_owned(),
            Err(e) => {
                debug!("cropdetect probe at {:.3}s failed: {}", timestamp, e);
                return Vec::new();
            }
        };

        match parse_cropdetect_output(&stderr) {
            Some(region) => region_to_box(region, info.width).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl FaceDetector for CropdetectDetector {
    async fn scan(&self, video: &Path, info: &MediaInfo) -> Result<FaceSignal> {
        let step = 1.0 / self.sample_fps;
        let mut frames = Vec::new();
        let mut timestamp = 0.0;

        while timestamp < info.duration {
            if self.cancel.is_cancelled() {
                return Err(ClipperError::Cancelled);
            }
            frames.push(self.probe_frame(video, timestamp, info).await);
            timestamp += step;
        }

        debug!(
            "face scan: {} samples, {} with detections",
            frames.len(),
            frames.iter().filter(|f| !f.is_empty()).count()
        );

        Ok(FaceSignal {
            frames,
            sample_fps: self.sample_fps,
        })
    }
}

/// Parse ffmpeg cropdetect stderr, returning the last (w, h, x, y) seen
fn parse_cropdetect_output(stderr: &str) -> Option<(u32, u32, u32, u32)> {
    let pattern = Regex::new(r"crop=(\d+):(\d+):(\d+):(\d+)").expect("crop pattern is valid");
    pattern
        .captures_iter(stderr)
        .last()
        .map(|c| (c[1].parse().ok(), c[2].parse().ok(), c[3].parse().ok(), c[4].parse().ok()))
        .and_then(|(w, h, x, y)| Some((w?, h?, x?, y?)))
}

/// A content region is only treated as a subject when it is clearly
/// narrower than the full frame.
fn region_to_box(region: (u32, u32, u32, u32), source_width: u32) -> Option<FaceBox> {
    let (width, height, x, y) = region;
    if width == 0 || height == 0 {
        return None;
    }
    if (width as f64) >= source_width as f64 * 0.85 {
        return None;
    }
    Some(FaceBox {
        x: x as f64,
        y: y as f64,
        width: width as f64,
        height: height as f64,
    })
}
