//! `Track`: aggregate of a `TrackDescriptor` plus pipeline handles and
//! runtime state (§3).

use uuid::Uuid;

use crate::model::fade_state::FadeState;
use crate::model::track_descriptor::TrackDescriptor;

/// Lifecycle status of a Track. Initial `Idle`; no terminal variant because
/// the Track is destroyed (dropped) on removal rather than transitioning
/// into one (§4.2 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Idle,
    Decoding,
    Playing,
    Paused,
}

/// A requested fade-in, either for this track or pre-registered for the
/// next track that will follow it (§3, §4.4 transition decisions).
#[derive(Debug, Clone, Copy, Default)]
pub struct FadeInRequest {
    pub enabled: bool,
    pub length_ms: u64,
}

impl FadeInRequest {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(length_ms: u64) -> Self {
        Self {
            enabled: true,
            length_ms,
        }
    }
}

/// Runtime aggregate for one track moving through the pipeline.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: Uuid,
    pub descriptor: TrackDescriptor,
    pub status: TrackStatus,

    pub fade_in_request: FadeInRequest,
    pub next_track_fade_in_request: FadeInRequest,

    /// When output must stop this track early; 0 = never (§3).
    pub interrupt_position_ms: u64,
    /// When to signal the Coordinator for next-track prep; 0 = never.
    pub about_to_finish_position_ms: u64,
    /// `about_to_finish` fires at most once per track (§3 invariant).
    pub about_to_finish_fired: bool,

    pub decoded_duration_ms: u64,
    pub played_duration_ms: u64,

    /// Synthetic duration for live streams (`cast == true`).
    pub cast_playtime_remaining_ms: Option<u64>,

    /// Cleared when the user skips this track manually; controls whether
    /// §4.1's replacement rule applies.
    pub replaceable: bool,

    pub source_plugin_id: String,
    /// Lower value sorts first in round-robin source scheduling (§4.1).
    pub source_priority: i32,

    pub fade: FadeState,
}

impl Track {
    pub fn new(descriptor: TrackDescriptor) -> Self {
        let source_plugin_id = descriptor.source_plugin_id.clone();
        Self {
            id: Uuid::new_v4(),
            descriptor,
            status: TrackStatus::Idle,
            fade_in_request: FadeInRequest::none(),
            next_track_fade_in_request: FadeInRequest::none(),
            interrupt_position_ms: 0,
            about_to_finish_position_ms: 0,
            about_to_finish_fired: false,
            decoded_duration_ms: 0,
            played_duration_ms: 0,
            cast_playtime_remaining_ms: None,
            replaceable: true,
            source_plugin_id,
            source_priority: 0,
            fade: FadeState::none(),
        }
    }

    /// `played_ms <= decoded_ms + one_buffer_duration` (§3, §8). `tolerance_ms`
    /// stands in for "one buffer duration" at the call site.
    pub fn within_playback_tolerance(&self, tolerance_ms: u64) -> bool {
        self.played_duration_ms <= self.decoded_duration_ms + tolerance_ms
    }

    /// Whether this track qualifies for the §4.1 replacement rule.
    pub fn qualifies_for_replacement(&self, min_played_ms: u64, min_cast_played_s: u64) -> bool {
        if !self.replaceable {
            return false;
        }
        if self.descriptor.cast {
            self.played_duration_ms < min_cast_played_s * 1000
        } else {
            self.played_duration_ms < min_played_ms
        }
    }
}
