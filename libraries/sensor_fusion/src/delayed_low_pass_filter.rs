//! Low-pass filter with a delay buffer in front of it, so it operates on
//! samples that are a configured time span old. Used to estimate gyro bias
//! from samples recorded safely before any motion that ends a stationary
//! period.

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::low_pass_filter::LowPassFilter;

#[derive(Clone, Debug)]
struct Sample {
    value: Vector3<f64>,
    delta_time_s: f64,
}

#[derive(Clone, Debug)]
pub struct DelayedLowPassFilter {
    delay_time_s: f64,
    buffer_accumulated_time_s: f64,
    delay_buffer: VecDeque<Sample>,
    low_pass_filter: LowPassFilter,
}

impl DelayedLowPassFilter {
    pub fn new(delay_time_s: f64, low_pass_cutoff_frequency: f64) -> Self {
        DelayedLowPassFilter {
            delay_time_s,
            buffer_accumulated_time_s: 0.0,
            delay_buffer: VecDeque::new(),
            low_pass_filter: LowPassFilter::new(low_pass_cutoff_frequency),
        }
    }

    /// Buffers a sample; once the buffered span reaches the configured delay,
    /// the oldest sample is fed into the low-pass filter.
    pub fn add_sample_data(&mut self, value: &Vector3<f64>, delta_time_s: f64) {
        if self.buffer_accumulated_time_s >= self.delay_time_s {
            if let Some(sample) = self.delay_buffer.pop_front() {
                self.low_pass_filter
                    .add_sample_data(&sample.value, sample.delta_time_s);
                self.buffer_accumulated_time_s -= sample.delta_time_s;
            }
        }
        self.buffer_accumulated_time_s += delta_time_s;
        self.delay_buffer.push_back(Sample {
            value: *value,
            delta_time_s,
        });
    }

    /// Returns the delayed filtered value once the buffer is full and the
    /// inner low-pass filter has settled.
    pub fn filtered_data(&self) -> Option<Vector3<f64>> {
        if self.buffer_accumulated_time_s < self.delay_time_s || !self.low_pass_filter.has_settled()
        {
            return None;
        }
        Some(self.low_pass_filter.filtered_data())
    }

    pub fn reset(&mut self) {
        self.delay_buffer.clear();
        self.buffer_accumulated_time_s = 0.0;
        self.low_pass_filter.reset();
    }

    /// Resets the filter and changes the inner cutoff frequency.
    pub fn set_cutoff_frequency(&mut self, cutoff_frequency: f64) {
        self.reset();
        self.low_pass_filter.set_cutoff_frequency(cutoff_frequency);
    }

    pub fn buffer_accumulated_time(&self) -> f64 {
        self.buffer_accumulated_time_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn no_output_before_buffer_fills_and_filter_settles() {
        let mut filter = DelayedLowPassFilter::new(1.0, 0.5);
        for _ in 0..50 {
            filter.add_sample_data(&Vector3::new(0.1, 0.0, 0.0), 0.01);
        }
        assert!(filter.filtered_data().is_none());
    }

    #[test]
    fn constant_input_eventually_reaches_the_output() {
        let target = Vector3::new(0.002, -0.001, 0.0005);
        let mut filter = DelayedLowPassFilter::new(1.0, 0.5);
        for _ in 0..4000 {
            filter.add_sample_data(&target, 0.01);
        }
        let output = filter.filtered_data().expect("filter should have settled");
        assert_relative_eq!(output, target, epsilon = 1e-6);
    }

    #[test]
    fn reset_clears_the_buffer() {
        let mut filter = DelayedLowPassFilter::new(1.0, 0.5);
        for _ in 0..4000 {
            filter.add_sample_data(&Vector3::new(0.1, 0.0, 0.0), 0.01);
        }
        assert!(filter.filtered_data().is_some());
        filter.reset();
        assert!(filter.filtered_data().is_none());
        assert_eq!(filter.buffer_accumulated_time(), 0.0);
    }
}
