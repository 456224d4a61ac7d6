//! Run state for Auto Clipper
//! Per-run progress fraction, usage counters and the cancellation token
//! shared between the pipeline thread and its observers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag polled at stage boundaries and inside
/// long-running external-tool loops.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress observer port: stage label plus overall fraction in `[0, 1]`.
pub type ProgressFn = Box<dyn Fn(&str, f64) + Send + Sync>;

/// Cumulative collaborator usage for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageReport {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub transcribed_audio_seconds: f64,
    pub synthesized_characters: u64,
}

/// Mutable state for one `process()` invocation. Written by the pipeline,
/// readable from any thread; reset at the start of each run.
pub struct RunState {
    progress_bits: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    audio_seconds_bits: AtomicU64,
    synthesized_characters: AtomicU64,
    cancel: CancelToken,
}

impl RunState {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            progress_bits: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            audio_seconds_bits: AtomicU64::new(0),
            synthesized_characters: AtomicU64::new(0),
            cancel,
        }
    }

    pub fn reset(&self) {
        self.progress_bits.store(0, Ordering::Relaxed);
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
        self.audio_seconds_bits.store(0, Ordering::Relaxed);
        self.synthesized_characters.store(0, Ordering::Relaxed);
    }

    /// Advance the progress fraction. Never moves backwards; returns the
    /// effective (possibly larger, previously reported) fraction.
    pub fn set_progress(&self, fraction: f64) -> f64 {
        let clamped = fraction.clamp(0.0, 1.0);
        // Bit patterns of non-negative f64 values order the same as the values.
        let prev = self
            .progress_bits
            .fetch_max(clamped.to_bits(), Ordering::Relaxed);
        f64::from_bits(prev).max(clamped)
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    pub fn add_token_usage(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn add_audio_seconds(&self, seconds: f64) {
        let mut current = self.audio_seconds_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + seconds).to_bits();
            match self.audio_seconds_bits.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn add_synthesized_characters(&self, characters: u64) {
        self.synthesized_characters
            .fetch_add(characters, Ordering::Relaxed);
    }

    pub fn usage(&self) -> UsageReport {
        UsageReport {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            transcribed_audio_seconds: f64::from_bits(
                self.audio_seconds_bits.load(Ordering::Relaxed),
            ),
            synthesized_characters: self.synthesized_characters.load(Ordering::Relaxed),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let state = RunState::new(CancelToken::new());
        assert_eq!(state.set_progress(0.5), 0.5);
        // A stale, smaller report must not move the fraction backwards
        assert_eq!(state.set_progress(0.3), 0.5);
        assert_eq!(state.progress(), 0.5);
        assert_eq!(state.set_progress(0.9), 0.9);
    }

    #[test]
    fn test_progress_clamped_to_unit_interval() {
        let state = RunState::new(CancelToken::new());
        assert_eq!(state.set_progress(1.7), 1.0);
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn test_usage_accumulates() {
        let state = RunState::new(CancelToken::new());
        state.add_token_usage(100, 20);
        state.add_token_usage(50, 5);
        state.add_audio_seconds(12.5);
        state.add_audio_seconds(2.5);
        state.add_synthesized_characters(42);

        let usage = state.usage();
        assert_eq!(usage.prompt_tokens, 150);
        assert_eq!(usage.completion_tokens, 25);
        assert_eq!(usage.transcribed_audio_seconds, 15.0);
        assert_eq!(usage.synthesized_characters, 42);
    }

    #[test]
    fn test_reset_clears_counters() {
        let state = RunState::new(CancelToken::new());
        state.set_progress(0.8);
        state.add_token_usage(10, 10);
        state.reset();
        assert_eq!(state.progress(), 0.0);
        assert_eq!(state.usage(), UsageReport::default());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let state = RunState::new(token.clone());
        assert!(!state.is_cancelled());
        token.cancel();
        assert!(state.is_cancelled());
    }
}
