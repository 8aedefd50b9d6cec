//! Plugin capability traits (§6, §9).
//!
//! The source's deep inheritance of plugin bases (Base -> Source / Decoder /
//! DSP / Output / Info) is replaced by tagged variants plus capability
//! traits: one enum over plugin roles, each role a trait with the
//! operations §6 specifies. This crate ships one concrete implementation of
//! each trait that still has one (the local-file/HTTP+ICY sources, the
//! equalizer/pre-DSP stage, and the cpal output) so a future catalog or UI
//! crate has a real seam to implement its own. The decoder stage (§4.3)
//! carries a single symphonia backend with no plugin seam: this engine
//! never had a second decode backend to select between, so there's no
//! capability trait for it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::track_descriptor::TrackDescriptor;

/// Which role a plugin fills in the pipeline (§9's "tagged variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginRole {
    Source,
    Decoder,
    PreDsp,
    Dsp,
    Output,
}

/// Mode passed to `get_playlist` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistMode {
    Normal,
    Loved,
    LovedSimilar,
}

/// Source plugin interface consumed by the Coordinator (§6).
///
/// `#[async_trait]` (the ecosystem crate, not a hand-rolled boxed-future
/// shim) keeps this trait object-safe so the Coordinator can hold a
/// `Vec<Box<dyn SourcePlugin>>` of heterogeneous sources.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    fn plugin_id(&self) -> &str;
    /// Lower value sorts first in round-robin scheduling (§4.1).
    fn priority(&self) -> i32;
    /// Whether this source currently has descriptors available without
    /// blocking (§4.1 "round-robin across 'ready' sources").
    fn is_ready(&self) -> bool;

    async fn get_playlist(&self, count: usize, mode: PlaylistMode) -> Result<Vec<TrackDescriptor>>;
    async fn get_replacement(&self) -> Result<Option<TrackDescriptor>>;

    fn unable_to_start(&self, url: &str);
    fn cast_finished_early(&self, url: &str, played_s: u64);
    fn done(&self, url: &str);
}

/// Pre-DSP / DSP plugin interface (§6). `priority()` orders the chain;
/// lower runs earlier.
pub trait DspStagePlugin: Send + Sync {
    fn priority(&self) -> i32;
    fn set_cast(&mut self, is_cast: bool);
}

/// Output plugin interface (§6). Only the main output drives the position
/// clock (§4.6, §9 Open Question: non-main outputs run in lock-step).
pub trait OutputPlugin: Send + Sync {
    fn is_main_output(&self) -> bool;
    fn pause(&mut self);
    fn resume(&mut self);
    fn main_output_position_us(&self) -> u64;
}

/// Feedback sink a Track forwards to its originating source (§6).
pub struct SourceFeedback {
    pub plugin_id: String,
    pub track_id: Uuid,
}
