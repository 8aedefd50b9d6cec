//! `ReplayGainAccumulator`: RMS histogram over 50 ms windows, yielding a
//! single target gain (§3, §4.4). Ported from
//! `original_source/wp_equalizer/replaygaincalculator.cpp`.

const RMS_BLOCK_SECONDS: f64 = 0.05;
const STATS_MAX_DB: usize = 120;
const STATS_STEPS_PER_DB: usize = 100;
const STATS_TABLE_SIZE: usize = STATS_MAX_DB * STATS_STEPS_PER_DB;
const STATS_RMS_PERCEPTION: f64 = 0.95;
const PINK_NOISE_REFERENCE: f64 = 64.82;

/// Monotonically-filling histogram of 50 ms RMS blocks, binned into a
/// 120 dB x 100-slots-per-dB table (§3).
pub struct ReplayGainAccumulator {
    frames_per_block: u64,
    sum_of_squares: f64,
    frame_count: u64,
    stats_table: Vec<u64>,
}

impl ReplayGainAccumulator {
    pub fn new(sample_rate: u32) -> Self {
        let frames_per_block = (sample_rate as f64 * RMS_BLOCK_SECONDS).ceil() as u64;
        Self {
            frames_per_block: frames_per_block.max(1),
            sum_of_squares: 0.0,
            frame_count: 0,
            stats_table: vec![0u64; STATS_TABLE_SIZE],
        }
    }

    /// Feed one stereo frame already normalized into the int16 domain
    /// (see `predsp::normalize_to_i16_range`).
    pub fn push_frame(&mut self, left_i16_domain: f64, right_i16_domain: f64) {
        self.sum_of_squares += left_i16_domain * left_i16_domain;
        self.sum_of_squares += right_i16_domain * right_i16_domain;
        self.frame_count += 1;

        if self.frame_count == self.frames_per_block {
            let mean_square = (self.sum_of_squares / self.frames_per_block as f64) * 0.5;
            let mut slot = STATS_STEPS_PER_DB as f64 * 10.0 * (mean_square + 1e-37).log10();
            if slot < 0.0 {
                slot = 0.0;
            }
            if slot > (STATS_TABLE_SIZE - 1) as f64 {
                slot = (STATS_TABLE_SIZE - 1) as f64;
            }
            self.stats_table[slot as usize] += 1;

            self.sum_of_squares = 0.0;
            self.frame_count = 0;
        }
    }

    /// Target gain adjustment in dB, per §4.4's formula. Stable once the
    /// histogram stops growing (§8 monotonicity property).
    pub fn target_gain_db(&self) -> f64 {
        let total: u64 = self.stats_table.iter().sum();
        if total == 0 {
            return 0.0;
        }

        let mut percepted = (total as f64 * (1.0 - STATS_RMS_PERCEPTION)).ceil() as i64;
        let mut slot_index = STATS_TABLE_SIZE;
        while slot_index > 0 {
            slot_index -= 1;
            percepted -= self.stats_table[slot_index] as i64;
            if percepted <= 0 {
                break;
            }
        }

        PINK_NOISE_REFERENCE - (slot_index as f64 / STATS_STEPS_PER_DB as f64)
    }

    pub fn total_blocks(&self) -> u64 {
        self.stats_table.iter().sum()
    }
}
