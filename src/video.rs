//! Video engine for Auto Clipper
//! Drives ffmpeg/ffprobe through declarative requests: cuts, crop-track
//! rendering, freeze frames, concatenation, audio extraction and caption
//! burns. Codec and rate choices always come in with the request.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::EncodeSettings;
use crate::error::{ClipperError, Result};
use crate::state::CancelToken;
use crate::tracking::CropTrack;
use crate::types::MediaInfo;

/// Encode parameters applied to a transcode request. Hook and main segments
/// must share one of these exactly for stream-copy concatenation to work.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProfile {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
    pub channels: u32,
}

impl EncodeProfile {
    pub fn from_settings(settings: &EncodeSettings, width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            video_codec: settings.video_codec.clone(),
            preset: settings.preset.clone(),
            crf: settings.crf,
            audio_codec: settings.audio_codec.clone(),
            audio_bitrate: settings.audio_bitrate.clone(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
        }
    }

    fn video_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-r".to_string(),
            format!("{}", self.fps),
            "-s".to_string(),
            format!("{}x{}", self.width, self.height),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]
    }

    fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
        ]
    }
}

/// Text overlay style for the hook freeze-frame
#[derive(Debug, Clone)]
pub struct TextStyle {
    pub font_size: u32,
    pub line_height: u32,
    pub font_color: String,
    pub box_color: String,
    pub box_border: u32,
    pub font_file: Option<String>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 58,
            line_height: 85,
            font_color: "#FFD700".to_string(),
            box_color: "white@0.95".to_string(),
            box_border: 12,
            font_file: None,
        }
    }
}

/// Transcoder collaborator. Every request is declarative: inputs, outputs
/// and the full encode profile travel with the call.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<MediaInfo>;
    async fn probe_duration(&self, input: &Path) -> Result<f64>;
    async fn cut(
        &self,
        input: &Path,
        start: f64,
        end: f64,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()>;
    async fn render_crop_track(
        &self,
        input: &Path,
        track: &CropTrack,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()>;
    async fn freeze_frame(
        &self,
        input: &Path,
        audio: &Path,
        lines: &[String],
        duration: f64,
        style: &TextStyle,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()>;
    async fn reencode(&self, input: &Path, profile: &EncodeProfile, output: &Path) -> Result<()>;
    async fn concat_copy(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
    async fn concat_filter(
        &self,
        inputs: &[PathBuf],
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()>;
    async fn extract_audio(&self, input: &Path, sample_rate: u32, output: &Path) -> Result<()>;
    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()>;
}

struct ToolOutput {
    stdout: String,
    stderr: String,
}

/// ffmpeg/ffprobe-backed engine with cooperative cancellation
pub struct FfmpegEngine {
    ffmpeg_path: String,
    ffprobe_path: String,
    cancel: CancelToken,
    timeout: Option<Duration>,
}

impl FfmpegEngine {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
        cancel: CancelToken,
        timeout_secs: Option<u64>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            cancel,
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    /// Run a tool to completion, polling the cancellation flag while it
    /// works. The process is killed on cancellation or timeout.
    async fn run_tool(&self, program: &str, args: Vec<String>) -> Result<ToolOutput> {
        debug!("{} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let started = std::time::Instant::now();
        let status = loop {
            if self.cancel.is_cancelled() {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ClipperError::Cancelled);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() > limit {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(ClipperError::ToolTimeout(limit.as_secs()));
                }
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_reader.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_reader.await.unwrap_or_default()).into_owned();

        if !status.success() {
            return Err(ClipperError::transcode(
                format!("{} exited with {}", program, status),
                Some(stderr.trim().to_string()),
            ));
        }

        Ok(ToolOutput { stdout, stderr })
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<()> {
        let ffmpeg = self.ffmpeg_path.clone();
        self.run_tool(&ffmpeg, args).await.map(|_| ())
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let ffprobe = self.ffprobe_path.clone();
        let output = self
            .run_tool(
                &ffprobe,
                vec![
                    "-v".to_string(),
                    "error".to_string(),
                    "-select_streams".to_string(),
                    "v:0".to_string(),
                    "-show_entries".to_string(),
                    "stream=width,height,avg_frame_rate".to_string(),
                    "-show_entries".to_string(),
                    "format=duration".to_string(),
                    "-of".to_string(),
                    "json".to_string(),
                    input.to_string_lossy().into_owned(),
                ],
            )
            .await?;

        parse_probe_json(&output.stdout)
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let ffprobe = self.ffprobe_path.clone();
        let output = self
            .run_tool(
                &ffprobe,
                vec![
                    "-v".to_string(),
                    "error".to_string(),
                    "-show_entries".to_string(),
                    "format=duration".to_string(),
                    "-of".to_string(),
                    "default=noprint_wrappers=1:nokey=1".to_string(),
                    input.to_string_lossy().into_owned(),
                ],
            )
            .await?;

        output.stdout.trim().parse().map_err(|_| {
            ClipperError::transcode(
                format!("unparsable duration for {}", input.display()),
                Some(output.stdout),
            )
        })
    }

    async fn cut(
        &self,
        input: &Path,
        start: f64,
        end: f64,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()> {
        if end <= start {
            return Err(ClipperError::transcode(
                format!("cut range is empty: {:.3}..{:.3}", start, end),
                None,
            ));
        }

        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{:.3}", start),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-t".to_string(),
            format!("{:.3}", end - start),
        ];
        args.extend(profile.video_args());
        args.extend(profile.audio_args());
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(args).await
    }

    async fn render_crop_track(
        &self,
        input: &Path,
        track: &CropTrack,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()> {
        let filter = format!(
            "crop={}:{}:{}:0,scale={}:{}:flags=lanczos",
            track.crop_width,
            track.crop_height,
            track.x_expression(),
            profile.width,
            profile.height
        );

        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vf".to_string(),
            filter,
        ];
        args.extend(profile.video_args());
        args.extend(profile.audio_args());
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(args).await
    }

    async fn freeze_frame(
        &self,
        input: &Path,
        audio: &Path,
        lines: &[String],
        duration: f64,
        style: &TextStyle,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()> {
        let drawtext = build_drawtext_chain(lines, style, profile.height);
        let filter = format!(
            "[0:v]trim=0:0.04,loop=loop=-1:size=1:start=0,setpts=N/{fps}/TB,{text},trim=0:{dur:.3},setpts=PTS-STARTPTS[v];[1:a]aresample={sr},apad=whole_dur={dur:.3}[a]",
            fps = profile.fps,
            text = drawtext,
            dur = duration,
            sr = profile.sample_rate,
        );

        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "[v]".to_string(),
            "-map".to_string(),
            "[a]".to_string(),
        ];
        args.extend(profile.video_args());
        args.extend(profile.audio_args());
        args.push("-t".to_string());
        args.push(format!("{:.3}", duration));
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(args).await
    }

    async fn reencode(&self, input: &Path, profile: &EncodeProfile, output: &Path) -> Result<()> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ];
        args.extend(profile.video_args());
        args.extend(profile.audio_args());
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(args).await
    }

    async fn concat_copy(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let list_file = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile()?;
        let listing = concat_listing(inputs);
        std::fs::write(list_file.path(), listing)?;

        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_file.path().to_string_lossy().into_owned(),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        self.run_ffmpeg(args).await
    }

    async fn concat_filter(
        &self,
        inputs: &[PathBuf],
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }

        let mut filter = String::new();
        for i in 0..inputs.len() {
            filter.push_str(&format!("[{i}:v:0][{i}:a:0]"));
        }
        filter.push_str(&format!(
            "concat=n={}:v=1:a=1[outv][outa]",
            inputs.len()
        ));

        args.push("-filter_complex".to_string());
        args.push(filter);
        args.push("-map".to_string());
        args.push("[outv]".to_string());
        args.push("-map".to_string());
        args.push("[outa]".to_string());
        args.extend(profile.video_args());
        args.extend(profile.audio_args());
        args.push("-y".to_string());
        args.push(output.to_string_lossy().into_owned());

        self.run_ffmpeg(args).await
    }

    async fn extract_audio(&self, input: &Path, sample_rate: u32, output: &Path) -> Result<()> {
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ar".to_string(),
            sample_rate.to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        self.run_ffmpeg(args).await
    }

    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        profile: &EncodeProfile,
        output: &Path,
    ) -> Result<()> {
        let ass_path = escape_filter_path(&subtitles.to_string_lossy());
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!("ass='{}'", ass_path),
            "-c:v".to_string(),
            profile.video_codec.clone(),
            "-preset".to_string(),
            profile.preset.clone(),
            "-crf".to_string(),
            profile.crf.to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        self.run_ffmpeg(args).await
    }
}

/// Stacked drawtext filters, one per line, centered horizontally with the
/// block vertically centered on the upper third of the frame.
fn build_drawtext_chain(lines: &[String], style: &TextStyle, frame_height: u32) -> String {
    let total_height = lines.len() as u32 * style.line_height;
    let start_y = (frame_height / 3).saturating_sub(total_height / 2);

    let font_file = style
        .font_file
        .as_ref()
        .map(|f| format!("fontfile='{}':", escape_filter_path(f)))
        .unwrap_or_default();

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            format!(
                "drawtext=text='{text}':{font}fontsize={size}:fontcolor={color}:box=1:boxcolor={boxc}:boxborderw={border}:x=(w-text_w)/2:y={y}",
                text = escape_drawtext(line),
                font = font_file,
                size = style.font_size,
                color = style.font_color,
                boxc = style.box_color,
                border = style.box_border,
                y = start_y + i as u32 * style.line_height,
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape text for a quoted drawtext value. A literal apostrophe cannot
/// live inside the quoted value, so it is swapped for the typographic glyph.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\u{2019}")
        .replace(':', "\\:")
        .replace(',', "\\,")
        .replace('%', "\\%")
}

/// Escape a path for use inside a quoted filter argument
fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "/").replace(':', "\\:")
}

/// concat-demuxer listing; paths use forward slashes
fn concat_listing(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\\', "/")))
        .collect()
}

fn parse_probe_json(stdout: &str) -> Result<MediaInfo> {
    let value: serde_json::Value = serde_json::from_str(stdout)?;
    let stream = value
        .get("streams")
        .and_then(|s| s.get(0))
        .ok_or_else(|| ClipperError::transcode("probe returned no video stream", None))?;

    let width = stream.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let fps = stream
        .get("avg_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_frame_rate)
        .unwrap_or(30.0);
    let duration = value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    if width == 0 || height == 0 {
        return Err(ClipperError::transcode(
            "probe returned empty dimensions",
            Some(stdout.to_string()),
        ));
    }

    Ok(MediaInfo {
        duration,
        width,
        height,
        fps,
    })
}

/// "30000/1001" → 29.97…, "30/1" → 30.0
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => rate.parse().ok(),
    }
}

/// Check that the required external tools respond on PATH
pub fn check_dependencies(ffmpeg: &str, ffprobe: &str, ytdlp: &str) -> Result<()> {
    let mut missing = Vec::new();

    for (name, program, arg) in [
        ("ffmpeg", ffmpeg, "-version"),
        ("ffprobe", ffprobe, "-version"),
        ("yt-dlp", ytdlp, "--version"),
    ] {
        let probe = std::process::Command::new(program)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if probe.is_err() {
            missing.push(name);
        }
    }

    if !missing.is_empty() {
        let mut message = missing.join(", ");
        match std::env::consts::OS {
            "linux" => message.push_str(
                ". On Linux (Ubuntu/Debian), try: sudo apt install ffmpeg && pip3 install -U yt-dlp",
            ),
            "macos" => message.push_str(". On macOS, try: brew install ffmpeg yt-dlp"),
            _ => message.push_str(". Ensure the tools are in your PATH."),
        }
        return Err(ClipperError::MissingTools(message));
    }

    Ok(())
}
