//! Pre-DSP pipeline stage: wires the ReplayGain accumulator and fade-out
//! detector to the buffer stream passing through this track's pipeline,
//! and emits the requests described in §6 ("Pre-DSP may also emit...").

use std::time::{Duration, Instant};

use crate::model::audio_buffer::AudioBuffer;
use crate::model::pcm_format::PcmFormat;
use crate::predsp::fade_detector::{FadeOutDetector, TransitionDecision};
use crate::predsp::normalize_to_i16_range;
use crate::predsp::read_frame_lr;
use crate::predsp::replaygain::ReplayGainAccumulator;

/// Typed inter-plugin messages a Pre-DSP stage can emit, matching §6's
/// plugin-to-plugin message contract (`message_id` + variant payload,
/// collapsed here into a Rust enum per the §9 redesign).
#[derive(Debug, Clone, PartialEq)]
pub enum PreDspMessage {
    /// Periodic (~4 s) or final ReplayGain target, delivered to the
    /// Equalizer (§4.4, §4.5).
    ReplayGainTarget { db: f64 },
    RequestFadeIn { length_ms: u64 },
    RequestFadeInForNextTrack { length_ms: u64 },
    RequestInterrupt { position_ms: u64, with_fadeout: bool },
    RequestAboutToFinishSend { position_ms: u64 },
    RequestAboutToFinishSendForPreviousTrack { position_before_end_ms: u64 },
}

const REPLAYGAIN_PUBLISH_INTERVAL: Duration = Duration::from_secs(4);

/// Runs both analyzers over every buffer that flows through this track's
/// Pre-DSP stage, unchanged, and surfaces the messages above (§4.4).
pub struct PreDspStage {
    format: Option<PcmFormat>,
    replaygain: Option<ReplayGainAccumulator>,
    fade_detector: Option<FadeOutDetector>,
    last_publish: Option<Instant>,
    decision_emitted: bool,
}

impl PreDspStage {
    pub fn new() -> Self {
        Self {
            format: None,
            replaygain: None,
            fade_detector: None,
            last_publish: None,
            decision_emitted: false,
        }
    }

    fn ensure_analyzers(&mut self, format: PcmFormat) {
        if self.format.is_none() {
            self.replaygain = Some(ReplayGainAccumulator::new(format.sample_rate));
            self.fade_detector = Some(FadeOutDetector::new(format.sample_rate));
            self.format = Some(format);
        }
    }

    /// Analyze one buffer in place (the buffer's bytes are not modified;
    /// Pre-DSP "passes PCM through unchanged" per §2). Returns any messages
    /// produced (a periodic ReplayGain publish, at most one per call).
    pub fn analyze(&mut self, buffer: &AudioBuffer) -> Vec<PreDspMessage> {
        self.ensure_analyzers(buffer.format);
        let format = buffer.format;

        let rg = self.replaygain.as_mut().expect("analyzers initialized");
        let fd = self.fade_detector.as_mut().expect("analyzers initialized");

        let mut frame_index = 0;
        while let Some((l, r)) = read_frame_lr(&buffer.data, &format, frame_index) {
            let l16 = normalize_to_i16_range(l, format.sample_type);
            let r16 = normalize_to_i16_range(r, format.sample_type);
            rg.push_frame(l16, r16);
            fd.push_frame(l16, r16);
            frame_index += 1;
        }

        let mut messages = Vec::new();
        let should_publish = match self.last_publish {
            None => true,
            Some(t) => t.elapsed() >= REPLAYGAIN_PUBLISH_INTERVAL,
        };
        if should_publish && rg.total_blocks() > 0 {
            messages.push(PreDspMessage::ReplayGainTarget { db: rg.target_gain_db() });
            self.last_publish = Some(Instant::now());
        }
        messages
    }

    /// Call once at end-of-decode. Applies the deterministic transition
    /// decision from §4.4 exactly once and translates it into the
    /// appropriate request messages.
    pub fn finalize(&mut self) -> Vec<PreDspMessage> {
        if self.decision_emitted {
            return Vec::new();
        }
        self.decision_emitted = true;

        let Some(fd) = &self.fade_detector else {
            return Vec::new();
        };
        let decision: TransitionDecision = fd.transition_decision();
        let rg = self.replaygain.as_ref();

        let mut messages = Vec::new();
        if let Some(rg) = rg {
            messages.push(PreDspMessage::ReplayGainTarget { db: rg.target_gain_db() });
        }
        if decision.fade_in_this_track_ms > 0 {
            messages.push(PreDspMessage::RequestFadeIn { length_ms: decision.fade_in_this_track_ms });
        }
        if decision.next_track_fade_in_ms > 0 {
            messages.push(PreDspMessage::RequestFadeInForNextTrack {
                length_ms: decision.next_track_fade_in_ms,
            });
        }
        if let Some(pos) = decision.about_to_finish_ms {
            messages.push(PreDspMessage::RequestAboutToFinishSend { position_ms: pos });
        }
        if let Some(pos) = decision.interrupt_ms {
            messages.push(PreDspMessage::RequestInterrupt { position_ms: pos, with_fadeout: true });
        }
        messages
    }
}

impl Default for PreDspStage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::pcm_format::SampleType;

    fn tone_buffer(seconds: f64, sample_rate: u32) -> AudioBuffer {
        let frames = (sample_rate as f64 * seconds) as usize;
        let mut data = Vec::with_capacity(frames * 8);
        for i in 0..frames {
            let v = if i % 2 == 0 { 0.5f32 } else { -0.5f32 };
            data.extend_from_slice(&v.to_ne_bytes());
            data.extend_from_slice(&v.to_ne_bytes());
        }
        AudioBuffer::new(PcmFormat::new(sample_rate, 2, SampleType::F32), 0, data)
    }

    #[test]
    fn finalize_emits_transition_messages_once() {
        let mut stage = PreDspStage::new();
        let buf = tone_buffer(2.0, 44100);
        stage.analyze(&buf);
        let first = stage.finalize();
        let second = stage.finalize();
        assert!(!first.is_empty());
        assert!(second.is_empty());
    }
}
