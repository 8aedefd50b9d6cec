//! `TrackDescriptor`: identity of a track, immutable once accepted by the
//! Coordinator except through the InfoUpdate channel (§4.6 of spec.md).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Identity and metadata of a track, as handed to the Coordinator by a
/// Source plugin (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub url: String,
    /// True for live streams, false for files.
    pub cast: bool,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub picture_urls: HashSet<String>,
    pub actions: HashSet<String>,
    /// Opaque identifier of the originating source plugin, used for
    /// `unable_to_start`/`cast_finished_early`/`done` feedback (§6).
    pub source_plugin_id: String,
    /// Set when this descriptor arrived via a direct `enqueue()` call
    /// rather than `request_playlist_more`/`get_replacement`. Resets the
    /// `unable_to_start` retry counter per the Open Question resolved in
    /// SPEC_FULL.md §4.1(a).
    pub manually_added: bool,
}

impl TrackDescriptor {
    pub fn new(url: impl Into<String>, source_plugin_id: impl Into<String>, cast: bool) -> Self {
        Self {
            url: url.into(),
            cast,
            title: None,
            performer: None,
            album: None,
            year: None,
            track_number: None,
            picture_urls: HashSet::new(),
            actions: HashSet::new(),
            source_plugin_id: source_plugin_id.into(),
            manually_added: false,
        }
    }

    pub fn manually(mut self) -> Self {
        self.manually_added = true;
        self
    }

    /// Apply a non-identity field update delivered over the InfoUpdate
    /// channel (e.g. a `CastTitle` event updating `performer`). The URL and
    /// cast flag never change once accepted.
    pub fn apply_info_update(&mut self, update: InfoUpdate) {
        match update {
            InfoUpdate::Title(t) => self.title = Some(t),
            InfoUpdate::Performer(p) => self.performer = Some(p),
            InfoUpdate::Album(a) => self.album = Some(a),
        }
    }
}

/// A field-level update delivered to an already-accepted `TrackDescriptor`.
#[derive(Debug, Clone)]
pub enum InfoUpdate {
    Title(String),
    Performer(String),
    Album(String),
}
