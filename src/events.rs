//! Typed events flowing between pipeline stages and up to the Coordinator.
//!
//! Replaces the source's signal/slot observer web with typed events over
//! bounded channels (§9 redesign): a stage never holds a back-reference to
//! its neighbors, it only sends `TrackEvent`s on the Track's control
//! channel, and the Coordinator is the sole subscriber that reacts to them.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, Severity};
use crate::model::audio_buffer::AudioBuffer;

/// One stage's role within a Track's pipeline, used to tag events so the
/// Coordinator and logs can tell which stage they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Source,
    Decoder,
    PreDsp,
    Dsp,
    Output,
}

/// Events emitted by a Track's pipeline stages onto its control channel
/// (§4.2 "Pipeline transport", §6 decoder/DSP/output plugin interfaces).
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// One PCM buffer is ready and has been handed to the next stage.
    BufferReady { track_id: Uuid, buffer: Arc<AudioBuffer> },
    /// A buffer has been fully consumed by every output sink and returned.
    BufferDone { track_id: Uuid, buffer_id: u64 },
    /// The decoder reached the end of the stream.
    DecoderFinished { track_id: Uuid },
    /// Network byte source signals `NetworkStarting`/`NetworkReady` (§4.3).
    NetworkStarting { track_id: Uuid, on: bool },
    NetworkReady { track_id: Uuid },
    /// A radio stream's ICY title changed (§4.3, §6).
    CastTitle { track_id: Uuid, stream_offset: u64, title: String },
    /// Pre-DSP analysis message (ReplayGain target, fade/transition
    /// requests) — §6's "typed inter-plugin messages".
    PreDsp(Uuid, crate::predsp::PreDspMessage),
    /// The output stage reports played position, at ~100 ms cadence (§4.6).
    PositionChanged { track_id: Uuid, position_us: u64 },
    /// Output underrun (§4.6, §4.2 failure policy).
    BufferUnderrun { track_id: Uuid },
    /// §3 invariant: fires at most once per track, before `Finished`.
    AboutToFinish { track_id: Uuid },
    /// Terminal event for a track's pipeline.
    Finished { track_id: Uuid },
    /// A stage surfaced an error (§7 propagation policy).
    Error { track_id: Uuid, stage: StageKind, error: Arc<EngineError>, severity: Severity },
}

impl TrackEvent {
    pub fn track_id(&self) -> Uuid {
        match self {
            TrackEvent::BufferReady { track_id, .. }
            | TrackEvent::BufferDone { track_id, .. }
            | TrackEvent::DecoderFinished { track_id }
            | TrackEvent::NetworkStarting { track_id, .. }
            | TrackEvent::NetworkReady { track_id }
            | TrackEvent::CastTitle { track_id, .. }
            | TrackEvent::PreDsp(track_id, _)
            | TrackEvent::PositionChanged { track_id, .. }
            | TrackEvent::BufferUnderrun { track_id }
            | TrackEvent::AboutToFinish { track_id }
            | TrackEvent::Finished { track_id }
            | TrackEvent::Error { track_id, .. } => *track_id,
        }
    }
}

/// Commands the Coordinator accepts, whether from the IPC surface (§6) or
/// from its own internal scheduling logic.
#[derive(Debug, Clone)]
pub enum CoordinatorCommand {
    Enqueue(Vec<crate::model::track_descriptor::TrackDescriptor>),
    SkipNext,
    Pause,
    Resume,
    RequestPlaylistMore { min_count: usize },
    RemoveTracks { url_prefix: String },
    ReportUnableToStart { track_id: Uuid },
    ReportCastEndedEarly { track_id: Uuid, seconds_played: u64 },
    /// Internal: a source's `get_playlist` future completed. Never sent by
    /// the IPC surface directly — routed back to the Coordinator's own
    /// command queue by the task `request_playlist_more` spawns, so the
    /// queue mutation itself still only ever happens on the supervisory
    /// task (§5).
    DeliverPlaylist { descriptors: Vec<crate::model::track_descriptor::TrackDescriptor> },
    /// Internal: a source's `get_replacement` future completed.
    DeliverReplacement { descriptor: Option<crate::model::track_descriptor::TrackDescriptor> },
}

/// Outbound notifications the Coordinator publishes for UI/IPC consumers
/// (§6 "Source emits"/"Coordinator ... surface playback events").
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    TrackInfo(crate::model::track_descriptor::TrackDescriptor),
    Position { track_id: Uuid, position_us: u64 },
    Paused,
    Resumed,
    RequestRemoveTracks,
    Error { message: String, fatal: bool },
}
