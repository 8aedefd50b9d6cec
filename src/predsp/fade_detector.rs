//! Fade-out detector: tracks the full-track envelope as 1 s average
//! amplitudes and produces the transition decision described in §4.4.
//! Ported from `original_source/wp_equalizer/fadeoutdetector.cpp`.

const INTERRUPT_FADE_MS: u64 = 4000;
const NEAR_SILENT_THRESHOLD: f64 = 10.0;
const NON_SILENT_FRACTION: f64 = 0.01; // "1% of int16 max"

#[derive(Debug, Clone, Copy)]
struct EnvelopePoint {
    position_us: u64,
    moving_average: f64,
}

/// Accumulates the rectified-mono envelope of a track across its whole
/// decode and, at end-of-decode, yields the three time coordinates and the
/// derived transition decision from §4.4.
pub struct FadeOutDetector {
    sample_rate: u32,
    frame_counter: u64,
    position_us: u64,
    first_non_silent_us: Option<u64>,
    last_non_silent_us: u64,
    sum: f64,
    sum_counter: u64,
    envelope_last_position_us: u64,
    envelope: Vec<EnvelopePoint>,
}

impl FadeOutDetector {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_counter: 0,
            position_us: 0,
            first_non_silent_us: None,
            last_non_silent_us: 0,
            sum: 0.0,
            sum_counter: 0,
            envelope_last_position_us: 0,
            envelope: Vec::new(),
        }
    }

    /// Feed one frame, already normalized into the int16 domain (left/right
    /// in that domain; mono sources pass the same value twice).
    pub fn push_frame(&mut self, left_i16_domain: f64, right_i16_domain: f64) {
        self.frame_counter += 1;
        self.position_us =
            (self.frame_counter as f64 / self.sample_rate as f64 * 1_000_000.0).round() as u64;

        let mono = ((left_i16_domain + right_i16_domain) / 2.0).abs();

        let threshold = (i16::MAX as f64) * NON_SILENT_FRACTION;
        if mono >= threshold {
            self.last_non_silent_us = self.position_us;
            if self.first_non_silent_us.is_none() {
                self.first_non_silent_us = Some(self.position_us);
            }
        }

        self.sum += mono;
        self.sum_counter += 1;

        if self.position_us >= self.envelope_last_position_us + 1_000_000 {
            let average = self.sum / self.sum_counter as f64;
            let moving_average = match self.envelope.last() {
                Some(prev) => (average + prev.moving_average) / 2.0,
                None => average,
            };
            self.envelope.push(EnvelopePoint {
                position_us: self.position_us,
                moving_average,
            });
            self.sum = 0.0;
            self.sum_counter = 0;
            self.envelope_last_position_us = self.position_us;
        }
    }

    pub fn first_non_silent_ms(&self) -> u64 {
        self.first_non_silent_us.unwrap_or(0) / 1000
    }

    pub fn last_non_silent_ms(&self) -> u64 {
        self.last_non_silent_us / 1000
    }

    pub fn fade_out_end_ms(&self) -> u64 {
        match self.envelope.last() {
            Some(p) => p.position_us / 1000,
            None => 0,
        }
    }

    /// Scan the envelope backward: skip trailing near-silent slots, then
    /// skip monotonically-decreasing slots; the first slot violating the
    /// decrease marks the start (§4.4).
    pub fn fade_out_start_ms(&self) -> u64 {
        let Some(last) = self.envelope.last() else {
            return 0;
        };
        let mut retval = last.position_us / 1000;
        let mut previous = 0.0f64;
        let mut i = self.envelope.len() as i64 - 1;

        while i >= 0 && self.envelope[i as usize].moving_average < NEAR_SILENT_THRESHOLD {
            retval = self.envelope[i as usize].position_us / 1000;
            previous = self.envelope[i as usize].moving_average;
            i -= 1;
        }
        while i >= 0 && self.envelope[i as usize].moving_average > previous {
            retval = self.envelope[i as usize].position_us / 1000;
            previous = self.envelope[i as usize].moving_average;
            i -= 1;
        }

        retval
    }
}

/// Outcome of applying §4.4's transition decision at end-of-decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionDecision {
    pub about_to_finish_ms: Option<u64>,
    pub interrupt_ms: Option<u64>,
    pub next_track_fade_in_ms: u64,
    /// This track itself should fade in (hard-onset avoidance).
    pub fade_in_this_track_ms: u64,
}

impl FadeOutDetector {
    /// Apply the deterministic decision tree from §4.4, given the detected
    /// envelope coordinates.
    pub fn transition_decision(&self) -> TransitionDecision {
        let fade_out_start = self.fade_out_start_ms();
        let fade_out_end = self.fade_out_end_ms();
        let fade_out_length = fade_out_end.saturating_sub(fade_out_start);
        let first_non_silent = self.first_non_silent_ms();
        let last_non_silent = self.last_non_silent_ms();

        let fade_in_this_track_ms = if first_non_silent < 100 { INTERRUPT_FADE_MS } else { 0 };

        let mut decision = TransitionDecision {
            about_to_finish_ms: None,
            interrupt_ms: None,
            next_track_fade_in_ms: 0,
            fade_in_this_track_ms,
        };

        if fade_out_length >= 8000 && fade_out_length < 25000 {
            decision.about_to_finish_ms = Some(fade_out_start);
            decision.next_track_fade_in_ms = (fade_out_length as f64 * 0.75).round() as u64;
        } else if fade_out_length >= 25000 {
            decision.about_to_finish_ms = Some(fade_out_start + fade_out_length / 3);
            decision.next_track_fade_in_ms = 0;
        } else if first_non_silent < 100 {
            decision.interrupt_ms =
                Some(last_non_silent.saturating_sub(INTERRUPT_FADE_MS).saturating_sub(500));
        } else {
            decision.about_to_finish_ms = Some(last_non_silent.saturating_sub(250));
            decision.next_track_fade_in_ms = 0;
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_silence(det: &mut FadeOutDetector, seconds: u32) {
        for _ in 0..(det.sample_rate * seconds) {
            det.push_frame(0.0, 0.0);
        }
    }

    fn feed_tone(det: &mut FadeOutDetector, seconds: u32, amplitude: f64) {
        for i in 0..(det.sample_rate * seconds) {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            det.push_frame(v, v);
        }
    }

    #[test]
    fn zero_length_track_has_no_envelope() {
        let det = FadeOutDetector::new(44100);
        assert_eq!(det.fade_out_end_ms(), 0);
        assert_eq!(det.first_non_silent_ms(), 0);
    }

    #[test]
    fn detects_gapless_case_no_trailing_silence() {
        let mut det = FadeOutDetector::new(44100);
        feed_tone(&mut det, 35, 20000.0);
        let decision = det.transition_decision();
        // Full-volume track with no fade-out envelope: falls into the
        // gapless branch since fade_out_length collapses to ~0.
        assert!(decision.about_to_finish_ms.is_some() || decision.interrupt_ms.is_some());
    }

    #[test]
    fn hard_onset_requests_fade_in() {
        let mut det = FadeOutDetector::new(44100);
        feed_tone(&mut det, 5, 20000.0);
        let decision = det.transition_decision();
        assert_eq!(decision.fade_in_this_track_ms, INTERRUPT_FADE_MS);
    }

    #[test]
    fn silent_lead_in_skips_fade_in_request() {
        let mut det = FadeOutDetector::new(44100);
        feed_silence(&mut det, 1);
        feed_tone(&mut det, 5, 20000.0);
        let decision = det.transition_decision();
        assert_eq!(decision.fade_in_this_track_ms, 0);
    }
}
