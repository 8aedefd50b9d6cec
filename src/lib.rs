//! # Waver playback engine
//!
//! Core playback engine: per-track pipeline (source -> decoder -> pre-DSP ->
//! DSP -> output) plus the playback coordinator that sequences tracks
//! through it, gapless and crossfaded.
//!
//! **Architecture:** one decode thread per live track feeding a tokio-driven
//! Coordinator, which mixes current/previous PCM into a single `cpal`
//! device stream (see `coordinator`, `pipeline`, `output`).

pub mod biquad;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod dsp;
pub mod error;
pub mod events;
pub mod ipc;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod predsp;
pub mod source;

pub use error::{EngineError, Result};
