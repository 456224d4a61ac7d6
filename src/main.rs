//! Auto Clipper
//! A CLI tool that turns long-form podcast videos into short, captioned,
//! vertically framed clips using LLM highlight selection and speaker
//! tracking.

mod ai;
mod captions;
mod config;
mod downloader;
mod error;
mod highlights;
mod hook;
mod pipeline;
mod state;
mod tracking;
mod transcript;
mod types;
mod video;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use simplelog::{Config, LevelFilter, WriteLogger};

use ai::OpenAiClient;
use config::AppConfig;
use downloader::YtDlpDownloader;
use error::ClipperError;
use pipeline::{ClipPipeline, PipelineSettings};
use state::{CancelToken, ProgressFn, RunState};
use tracking::CropdetectDetector;
use types::{APP_NAME, APP_VERSION};
use video::{FfmpegEngine, TextStyle};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let debug_mode = args.iter().any(|a| a == "--debug");
    if debug_mode {
        let _ = WriteLogger::init(
            LevelFilter::Debug,
            Config::default(),
            OpenOptions::new()
                .create(true)
                .append(true)
                .open("debug.log")?,
        );
        log::info!("Starting {} {} with debug logging", APP_NAME, APP_VERSION);
        log::debug!("Raw args: {:?}", args);
    }

    let actual_args: Vec<String> = args.iter().filter(|a| *a != "--debug").cloned().collect();
    if actual_args.len() < 2 {
        eprintln!("{} {}", APP_NAME, APP_VERSION);
        eprintln!("Usage: {} <video_url> [num_clips] [--debug]", actual_args[0]);
        eprintln!("\nExample:");
        eprintln!(
            "  {} https://www.youtube.com/watch?v=abc123 3",
            actual_args[0]
        );
        std::process::exit(1);
    }

    let url = &actual_args[1];
    let num_clips: usize = actual_args
        .get(2)
        .map(|s| s.parse().unwrap_or(5))
        .unwrap_or(5);

    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            AppConfig::create_default().context("Failed to write default settings.json")?;
            anyhow::bail!(
                "{}. A default settings.json was created next to the binary; fill in openai_api_key and run again.",
                e
            );
        }
    };
    cfg.ensure_output_dir()?;
    video::check_dependencies(&cfg.ffmpeg_path, &cfg.ffprobe_path, &cfg.ytdlp_path)?;

    let cancel = CancelToken::new();
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling, finishing up...");
                token.cancel();
            }
        });
    }

    let client = Arc::new(OpenAiClient::new(
        cfg.openai_api_key.clone(),
        cfg.api_base.clone(),
        cfg.completion_model.clone(),
    ));
    let engine = Arc::new(FfmpegEngine::new(
        cfg.ffmpeg_path.clone(),
        cfg.ffprobe_path.clone(),
        cancel.clone(),
        cfg.encode.tool_timeout_secs,
    ));
    let downloader = Arc::new(YtDlpDownloader::new(
        cfg.ytdlp_path.clone(),
        cfg.subtitle_lang.clone(),
        cfg.use_cookies,
        cfg.cookies_path.clone(),
        cancel.clone(),
    ));
    let detector = Arc::new(CropdetectDetector::new(
        cfg.ffmpeg_path.clone(),
        cfg.crop.sample_fps,
        cancel.clone(),
    ));

    let hook_style = TextStyle {
        font_file: cfg.hook_font.clone(),
        ..TextStyle::default()
    };
    let settings = PipelineSettings {
        output_dir: PathBuf::from(&cfg.output_dir),
        subtitle_lang: cfg.subtitle_lang.clone(),
        tts_voice: cfg.tts_voice.clone(),
        hook_style,
        crop: cfg.crop.clone(),
        encode: cfg.encode.clone(),
    };

    let state = Arc::new(RunState::new(cancel));
    let progress: ProgressFn = Box::new(|stage, fraction| {
        println!("[{:>3.0}%] {}", fraction * 100.0, stage);
    });

    let pipeline = ClipPipeline::new(
        downloader,
        engine,
        detector,
        client.clone(),
        client.clone(),
        client,
        settings,
        state.clone(),
        progress,
    );

    match pipeline.process(url, num_clips).await {
        Ok(results) => {
            println!("\n✅ Created {} clips in: {}", results.len(), cfg.output_dir);
            for clip in &results {
                println!(
                    "  {:02}. {} ({:.0}s + {:.1}s hook)",
                    clip.index, clip.title, clip.duration_seconds, clip.hook_duration
                );
            }
            let usage = state.usage();
            println!(
                "\nUsage: {} prompt + {} completion tokens, {:.1}s transcribed, {} TTS characters",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.transcribed_audio_seconds,
                usage.synthesized_characters
            );
            Ok(())
        }
        Err(ClipperError::Cancelled) => {
            println!("\nRun cancelled. Finished clips were kept.");
            Ok(())
        }
        Err(e) => {
            if let ClipperError::Transcode {
                stderr: Some(stderr),
                ..
            } = &e
            {
                log::error!("tool output: {}", stderr);
                eprintln!("--- tool output ---\n{}", stderr);
            }
            Err(e.into())
        }
    }
}
