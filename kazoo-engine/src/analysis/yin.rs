//! YIN pitch estimator
//!
//! Difference function, cumulative mean normalized difference, absolute
//! threshold with local-minimum walk, and parabolic interpolation
//! (de Cheveigné & Kawahara, 2002).

use super::{volume_db, PitchEstimator};
use kazoo_common::config::PitchDetectorConfig;
use kazoo_common::PitchEstimate;

/// YIN estimator gated by input level and clarity
pub struct YinEstimator {
    config: PitchDetectorConfig,
    sample_rate: u32,
    difference: Vec<f32>,
    cumulative_mean: Vec<f32>,
}

impl YinEstimator {
    pub fn new(config: PitchDetectorConfig) -> Self {
        Self {
            config,
            sample_rate: 0,
            difference: Vec::new(),
            cumulative_mean: Vec::new(),
        }
    }

    /// YIN threshold implied by the clarity threshold
    fn threshold(&self) -> f32 {
        (1.0 - self.config.clarity_threshold).clamp(0.01, 0.5)
    }

    fn period_bounds(&self) -> (usize, usize) {
        let sr = self.sample_rate as f32;
        let min_period = (sr / self.config.max_frequency).floor() as usize;
        let max_period = (sr / self.config.min_frequency).ceil() as usize;
        (min_period.max(2), max_period)
    }

    fn compute_difference(&mut self, samples: &[f32], max_period: usize) {
        let window = samples.len() - max_period;
        self.difference[0] = 0.0;
        for tau in 1..=max_period {
            let mut sum = 0.0f32;
            for j in 0..window {
                let delta = samples[j] - samples[j + tau];
                sum += delta * delta;
            }
            self.difference[tau] = sum;
        }
    }

    fn compute_cumulative_mean(&mut self, max_period: usize) {
        self.cumulative_mean[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..=max_period {
            running_sum += self.difference[tau];
            self.cumulative_mean[tau] = if running_sum > 1e-10 {
                self.difference[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    /// First local minimum under the threshold, else the global minimum
    fn best_period(&self, min_period: usize, max_period: usize) -> (usize, f32) {
        let threshold = self.threshold();
        let mut tau = min_period;
        while tau < max_period {
            if self.cumulative_mean[tau] < threshold {
                while tau + 1 < max_period && self.cumulative_mean[tau + 1] < self.cumulative_mean[tau] {
                    tau += 1;
                }
                return (tau, self.cumulative_mean[tau]);
            }
            tau += 1;
        }

        let mut best_tau = min_period;
        let mut best_val = self.cumulative_mean[min_period];
        for tau in min_period + 1..=max_period {
            if self.cumulative_mean[tau] < best_val {
                best_val = self.cumulative_mean[tau];
                best_tau = tau;
            }
        }
        (best_tau, best_val)
    }

    fn refine(&self, tau: usize, max_period: usize) -> f32 {
        if tau < 1 || tau >= max_period {
            return tau as f32;
        }
        let s0 = self.cumulative_mean[tau - 1];
        let s1 = self.cumulative_mean[tau];
        let s2 = self.cumulative_mean[tau + 1];
        let denom = 2.0 * (2.0 * s1 - s2 - s0);
        if denom.abs() < 1e-12 {
            return tau as f32;
        }
        tau as f32 + (s2 - s0) / denom
    }
}

impl PitchEstimator for YinEstimator {
    fn initialize(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        let (_, max_period) = self.period_bounds();
        self.difference = vec![0.0; max_period + 2];
        self.cumulative_mean = vec![0.0; max_period + 2];
    }

    fn detect(&mut self, samples: &[f32], volume: f32) -> Option<PitchEstimate> {
        if self.sample_rate == 0 {
            return None;
        }
        let (min_period, max_period) = self.period_bounds();
        if samples.len() < max_period * 2 || max_period <= min_period {
            return None;
        }

        let level_db = volume_db(volume);
        if volume < self.config.min_volume {
            return Some(PitchEstimate::silence(level_db));
        }

        self.compute_difference(samples, max_period);
        self.compute_cumulative_mean(max_period);
        let (tau, aperiodicity) = self.best_period(min_period, max_period);
        let clarity = (1.0 - aperiodicity).clamp(0.0, 1.0);

        if clarity < self.config.clarity_threshold {
            return Some(PitchEstimate::new(0.0, clarity, level_db));
        }

        let period = self.refine(tau, max_period);
        let frequency = self.sample_rate as f32 / period;
        if frequency < self.config.min_frequency || frequency > self.config.max_frequency {
            return Some(PitchEstimate::new(0.0, clarity, level_db));
        }

        Some(PitchEstimate::new(frequency, clarity, level_db))
    }

    fn window_size(&self) -> usize {
        let (_, max_period) = self.period_bounds();
        (max_period * 2).next_power_of_two().max(1024)
    }
}
