//! Downloader module for Auto Clipper
//! Drives yt-dlp to fetch the source video, its subtitle track and the
//! video metadata, streaming download progress back to the caller.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::error::{ClipperError, Result};
use crate::state::CancelToken;
use crate::types::VideoMetadata;

const DESCRIPTION_LIMIT: usize = 2000;

/// What one acquisition yields: media file, optional subtitle, metadata
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub video_path: PathBuf,
    pub subtitle_path: Option<PathBuf>,
    pub metadata: VideoMetadata,
}

/// Downloader collaborator port
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        work_dir: &Path,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<DownloadResult>;
}

/// yt-dlp-backed downloader
pub struct YtDlpDownloader {
    ytdlp_path: String,
    subtitle_lang: String,
    use_cookies: bool,
    cookies_path: String,
    cancel: CancelToken,
}

impl YtDlpDownloader {
    pub fn new(
        ytdlp_path: impl Into<String>,
        subtitle_lang: impl Into<String>,
        use_cookies: bool,
        cookies_path: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            subtitle_lang: subtitle_lang.into(),
            use_cookies,
            cookies_path: cookies_path.into(),
            cancel,
        }
    }

    /// Pre-fetch {title, description, channel}. Failures degrade to empty
    /// metadata; the pipeline can select highlights without it.
    async fn fetch_metadata(&self, url: &str) -> VideoMetadata {
        let mut args = vec!["--dump-json", "--no-download", "--no-warnings"];
        if self.use_cookies {
            args.push("--cookies");
            args.push(&self.cookies_path);
        }
        args.push(url);

        let output = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;

        let stdout = match output {
            Ok(out) if out.status.success() => out.stdout,
            _ => {
                warn!("could not fetch video metadata");
                return VideoMetadata::default();
            }
        };

        match serde_json::from_slice::<serde_json::Value>(&stdout) {
            Ok(value) => {
                let metadata = VideoMetadata {
                    title: string_field(&value, "title"),
                    description: truncate_chars(&string_field(&value, "description"), DESCRIPTION_LIMIT),
                    channel: string_field(&value, "channel"),
                };
                info!("source: {}", metadata.title);
                metadata
            }
            Err(e) => {
                warn!("could not parse video metadata: {}", e);
                VideoMetadata::default()
            }
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch(
        &self,
        url: &str,
        work_dir: &Path,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<DownloadResult> {
        let metadata = self.fetch_metadata(url).await;

        let output_template = work_dir.join("source.%(ext)s");
        let template = output_template.to_string_lossy().into_owned();
        let mut args = vec![
            "-f",
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            "--write-sub",
            "--write-auto-sub",
            "--sub-lang",
            &self.subtitle_lang,
            "--convert-subs",
            "srt",
            "--merge-output-format",
            "mp4",
            "--no-warnings",
            "--newline",
            "-o",
            &template,
        ];
        if self.use_cookies {
            args.push("--cookies");
            args.push(&self.cookies_path);
        }
        args.push(url);

        debug!("yt-dlp {}", args.join(" "));

        let mut child = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClipperError::download(format!("failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClipperError::download("yt-dlp stdout unavailable"))?;
        let mut stderr_pipe = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            if self.cancel.is_cancelled() {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ClipperError::Cancelled);
            }

            let line = tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => line,
                    None => break,
                },
                _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
            };

            if let Some(percent) = parse_download_progress(&line) {
                progress(percent / 100.0);
            } else if line.contains("[Merger]") || line.contains("Merging") {
                info!("merging video & audio");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr =
                String::from_utf8_lossy(&stderr_reader.await.unwrap_or_default()).into_owned();
            return Err(ClipperError::download(format!(
                "yt-dlp exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        let video_path = work_dir.join("source.mp4");
        if !video_path.exists() {
            return Err(ClipperError::download("yt-dlp produced no source.mp4"));
        }

        let subtitle_path = work_dir.join(format!("source.{}.srt", self.subtitle_lang));
        let subtitle_path = if subtitle_path.exists() {
            Some(subtitle_path)
        } else {
            warn!("no '{}' subtitle was produced", self.subtitle_lang);
            None
        };

        Ok(DownloadResult {
            video_path,
            subtitle_path,
            metadata,
        })
    }
}

/// Extract the percentage from a yt-dlp "[download]  42.3% of ..." line
pub fn parse_download_progress(line: &str) -> Option<f64> {
    if !line.contains("[download]") || !line.contains('%') {
        return None;
    }
    let pattern = Regex::new(r"(\d+\.?\d*)%").expect("percent pattern is valid");
    pattern
        .captures(line)
        .and_then(|c| c[1].parse::<f64>().ok())
}

fn string_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Character-boundary-safe truncation
fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
