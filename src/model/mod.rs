//! Data model shared across the playback engine (§3).

pub mod audio_buffer;
pub mod fade_state;
pub mod pcm_format;
pub mod playlist_queue;
pub mod track;
pub mod track_descriptor;

pub use audio_buffer::{AudioBuffer, RefcountedBuffer};
pub use fade_state::{FadeDirection, FadeState};
pub use pcm_format::{PcmFormat, SampleType};
pub use playlist_queue::PlaylistQueue;
pub use track::{FadeInRequest, Track, TrackStatus};
pub use track_descriptor::{InfoUpdate, TrackDescriptor};
