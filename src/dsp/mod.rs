//! DSP chain: the equalizer (§4.5) and the fade renderer (§4.7). Applied to
//! PCM after Pre-DSP analysis, in the Output stage for fades and in this
//! stage for ReplayGain/EQ correction.

pub mod equalizer;
pub mod fader;

pub use equalizer::{BandGains, Equalizer, FLAT_GAINS};
pub use fader::FadeRenderer;
