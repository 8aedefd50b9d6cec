//! Error taxonomy for the playback engine.
//!
//! Implements the error kinds catalogued in §7 of the engine specification:
//! `ConfigInvalid`, `NetworkTransient`, `NetworkFatal`, `DecoderFormatUnsupported`,
//! `OutputDeviceError`, and `InternalInvariantBroken`, each carrying a severity
//! and a human-readable message so the Coordinator can decide skip/replace/halt.

use thiserror::Error;

/// Top-level engine error, aggregating every stage's narrower error enum.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("network error (transient): {0}")]
    NetworkTransient(String),

    #[error("network error (fatal): {0}")]
    NetworkFatal(String),

    #[error("no decoder plugin accepted the stream: {0}")]
    DecoderFormatUnsupported(String),

    #[error("output device error: {0}")]
    OutputDeviceError(String),

    #[error("internal invariant broken: {0}")]
    InternalInvariantBroken(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised while decoding a bitstream into PCM.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to probe format")]
    ProbeFailure,

    #[error("no audio tracks found in stream")]
    NoAudioTracks,

    #[error("decode failed: {0}")]
    Failed(String),
}

/// Errors raised by the buffer pool / refcount tracker.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer refcount underflowed (released more than acquired)")]
    RefcountUnderflow,

    #[error("buffer queue is full")]
    QueueFull,

    #[error("buffer was already returned to the decoder")]
    AlreadyReturned,
}

/// Errors raised by a byte source (file or network) feeding the decoder.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("pre-cache timeout after {0:?}")]
    PreCacheTimeout(std::time::Duration),

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(u32),

    #[error("server refused request: {0}")]
    ServerRefused(String),

    #[error("underrun wait exceeded {0:?} with no progress")]
    StalledUnderrun(std::time::Duration),

    #[error("local file not found: {0}")]
    FileNotFound(String),
}

/// Severity for error propagation, per §7's policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Logged, surfaced as an info message, playback continues.
    NonFatal,
    /// Terminates the affected Track; Coordinator decides what happens next.
    Fatal,
}

/// What the Coordinator should do after a fatal error, per §4.1/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Try the next decoder plugin by priority before giving up.
    RetryNextDecoder,
    /// Request exactly one replacement track from the originating source.
    RequestReplacement,
    /// Skip to the next queued track.
    Skip,
    /// Pause output and surface the error to any listening UI.
    Halt,
}

impl EngineError {
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::NetworkTransient(_) => Severity::NonFatal,
            EngineError::Buffer(BufferError::QueueFull) => Severity::NonFatal,
            _ => Severity::Fatal,
        }
    }

    /// Recovery policy per §7.
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            EngineError::DecoderFormatUnsupported(_) => RecoveryAction::RetryNextDecoder,
            EngineError::NetworkFatal(_) => RecoveryAction::RequestReplacement,
            EngineError::ConfigInvalid(_) => RecoveryAction::Skip,
            EngineError::OutputDeviceError(_) => RecoveryAction::Halt,
            EngineError::InternalInvariantBroken(_) => RecoveryAction::Halt,
            _ => RecoveryAction::Skip,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_network_errors_are_non_fatal() {
        let e = EngineError::NetworkTransient("timeout".into());
        assert_eq!(e.severity(), Severity::NonFatal);
    }

    #[test]
    fn format_unsupported_retries_next_decoder() {
        let e = EngineError::DecoderFormatUnsupported("opus".into());
        assert_eq!(e.recovery_action(), RecoveryAction::RetryNextDecoder);
    }

    #[test]
    fn network_fatal_requests_replacement() {
        let e = EngineError::NetworkFatal("503".into());
        assert_eq!(e.recovery_action(), RecoveryAction::RequestReplacement);
    }

    #[test]
    fn output_device_error_halts() {
        let e = EngineError::OutputDeviceError("ALSA gone".into());
        assert_eq!(e.severity(), Severity::Fatal);
        assert_eq!(e.recovery_action(), RecoveryAction::Halt);
    }
}
