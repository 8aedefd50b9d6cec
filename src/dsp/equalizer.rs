//! Ten-band shelving equalizer with an integrated ReplayGain pre-filter
//! (§4.5). Band layout and bandwidth computation ported from
//! `original_source/wp_equalizer/equalizer.cpp::Equalizer()`/`createFilters()`.

use crate::biquad::{biquad_coefficients, BiquadFilter, FilterType};
use crate::model::pcm_format::{PcmFormat, SampleType};

const CENTER_FREQUENCIES: [f64; 10] = [31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 16000.0];
const REPLAYGAIN_STEP_CAP_DB_PER_SEC: f64 = 3.0;
const REPLAYGAIN_SNAP_THRESHOLD_DB: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
struct Band {
    center_hz: f64,
    bandwidth_hz: f64,
}

/// Compute the ten band centers/bandwidths so that successive shelves meet
/// at the geometric midpoints of adjacent centers (§4.5).
fn compute_bands() -> Vec<Band> {
    let mut bands = Vec::with_capacity(CENTER_FREQUENCIES.len());
    bands.push(Band {
        center_hz: CENTER_FREQUENCIES[0],
        bandwidth_hz: CENTER_FREQUENCIES[0] / 2.0,
    });
    let mut previous_high = CENTER_FREQUENCIES[0] * 1.25;
    for &center in &CENTER_FREQUENCIES[1..] {
        let bandwidth = (center - previous_high) * 2.0;
        bands.push(Band {
            center_hz: center,
            bandwidth_hz: bandwidth,
        });
        previous_high = center + bandwidth / 2.0;
    }
    bands
}

fn filter_type_for(index: usize, band_count: usize) -> FilterType {
    if index == 0 {
        FilterType::LowShelf
    } else if index < band_count - 1 {
        FilterType::BandShelf
    } else {
        FilterType::HighShelf
    }
}

/// Per-channel gains, in dB, for the ten bands.
pub type BandGains = [f64; 10];

/// Ten-band shelving equalizer applying ReplayGain + pre-amp correction on
/// the first band's input stage, then the band chain, clamping to the
/// sample type's range afterward (§4.5 "Saturation").
pub struct Equalizer {
    bands: Vec<Band>,
    filters: Vec<BiquadFilter>,
    sample_rate: u32,
    gains_db: BandGains,
    target_replay_gain_db: f64,
    current_replay_gain_db: f64,
    pre_amp_db: f64,
}

impl Equalizer {
    pub fn new(sample_rate: u32, gains_db: BandGains, pre_amp_db: f64) -> Self {
        let bands = compute_bands();
        let filters = bands
            .iter()
            .enumerate()
            .map(|(i, band)| {
                let c = biquad_coefficients(
                    filter_type_for(i, bands.len()),
                    band.center_hz,
                    band.bandwidth_hz,
                    sample_rate,
                    gains_db[i],
                );
                BiquadFilter::new(c)
            })
            .collect();

        Self {
            bands,
            filters,
            sample_rate,
            gains_db,
            target_replay_gain_db: 0.0,
            current_replay_gain_db: 0.0,
            pre_amp_db,
        }
    }

    /// Update the target from the Pre-DSP plugin message (§4.5). Takes
    /// effect gradually via `step_replay_gain`, not instantly.
    pub fn set_target_replay_gain(&mut self, db: f64) {
        self.target_replay_gain_db = db;
    }

    pub fn set_band_gain(&mut self, index: usize, gain_db: f64) {
        self.gains_db[index] = gain_db;
        let band = self.bands[index];
        let c = biquad_coefficients(
            filter_type_for(index, self.bands.len()),
            band.center_hz,
            band.bandwidth_hz,
            self.sample_rate,
            gain_db,
        );
        self.filters[index].set_coefficients(c);
    }

    /// One frame-period step toward the target, per §4.5's anti-zipper
    /// rule: snap within 0.05 dB, otherwise move at most 3 dB/s worth of
    /// delta for this sample period.
    fn step_replay_gain(&mut self) {
        let delta = self.target_replay_gain_db - self.current_replay_gain_db;
        if delta.abs() < REPLAYGAIN_SNAP_THRESHOLD_DB {
            self.current_replay_gain_db = self.target_replay_gain_db;
        } else {
            let change_per_sec = REPLAYGAIN_STEP_CAP_DB_PER_SEC.min(delta.abs());
            let step = (change_per_sec / self.sample_rate as f64) * delta.signum();
            self.current_replay_gain_db += step;
        }
    }

    fn replay_gain_multiplier(&self) -> f64 {
        10f64.powf((self.current_replay_gain_db + self.pre_amp_db) / 20.0)
    }

    /// Filter one interleaved PCM buffer in place.
    pub fn process(&mut self, data: &mut [u8], format: &PcmFormat) {
        let frame_bytes = format.frame_bytes();
        let sample_bytes = format.sample_type.byte_width();
        let (range_min, range_max) = format.sample_type.range();

        let mut frame_start = 0;
        while frame_start + frame_bytes <= data.len() {
            self.step_replay_gain();
            let gain = self.replay_gain_multiplier();

            for channel in 0..(format.channels as usize).min(crate::biquad::MAX_CHANNELS) {
                let offset = frame_start + channel * sample_bytes;
                let mut sample = read_sample(&data[offset..offset + sample_bytes], format.sample_type);

                sample *= gain;
                for filter in &mut self.filters {
                    sample = filter.process_sample(channel, sample);
                }

                let clamped = sample.clamp(range_min, range_max);
                write_sample(&mut data[offset..offset + sample_bytes], format.sample_type, clamped);
            }

            frame_start += frame_bytes;
        }
    }

    pub fn current_replay_gain_db(&self) -> f64 {
        self.current_replay_gain_db
    }
}

fn read_sample(bytes: &[u8], sample_type: SampleType) -> f64 {
    match sample_type {
        SampleType::I8 => bytes[0] as i8 as f64,
        SampleType::U8 => bytes[0] as f64,
        SampleType::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
        SampleType::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
        SampleType::I32 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleType::U32 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleType::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    }
}

fn write_sample(bytes: &mut [u8], sample_type: SampleType, value: f64) {
    match sample_type {
        SampleType::I8 => bytes[0] = (value.round() as i8) as u8,
        SampleType::U8 => bytes[0] = value.round() as u8,
        SampleType::I16 => bytes.copy_from_slice(&(value.round() as i16).to_ne_bytes()),
        SampleType::U16 => bytes.copy_from_slice(&(value.round() as u16).to_ne_bytes()),
        SampleType::I32 => bytes.copy_from_slice(&(value.round() as i32).to_ne_bytes()),
        SampleType::U32 => bytes.copy_from_slice(&(value.round() as u32).to_ne_bytes()),
        SampleType::F32 => bytes.copy_from_slice(&(value as f32).to_ne_bytes()),
    }
}

/// All-zero gains, used as the identity equalizer configuration.
pub const FLAT_GAINS: BandGains = [0.0; 10];
