//! Error taxonomy for Auto Clipper
//! Typed failures surfaced by the clip pipeline and its collaborators.

use thiserror::Error;

/// Result type used throughout the pipeline.
pub type Result<T> = std::result::Result<T, ClipperError>;

/// Errors that can abort a pipeline run.
#[derive(Debug, Error)]
pub enum ClipperError {
    #[error("download failed: {message}")]
    Download { message: String },

    #[error("no '{lang}' subtitle available for this video")]
    NoTranscript { lang: String },

    #[error("model response could not be parsed: {message}")]
    MalformedResponse { message: String },

    #[error("no highlight met the duration bounds")]
    NoHighlights,

    #[error("transcode failed: {message}")]
    Transcode {
        message: String,
        stderr: Option<String>,
    },

    #[error("{service} request failed: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    #[error("missing required tools: {0}")]
    MissingTools(String),

    #[error("external tool timed out after {0}s")]
    ToolTimeout(u64),

    #[error("cancelled by user")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClipperError {
    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn transcode(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Transcode {
            message: message.into(),
            stderr,
        }
    }

    pub fn api(service: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            service,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = ClipperError::transcode("ffmpeg exited with 1", Some("bad filter".to_string()));
        assert!(err.to_string().contains("ffmpeg exited with 1"));

        let err = ClipperError::NoTranscript {
            lang: "en".to_string(),
        };
        assert!(err.to_string().contains("'en'"));
    }

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(ClipperError::Io(_))));
    }
}
