//! First-order low-pass IIR filter on 3-vectors.

use nalgebra::Vector3;

/// This number of contiguous static samples is required to confirm there is
/// no motion.
pub const CONTIGUOUS_STATIC_SAMPLES: u32 = 11;

/// Filters out signals with frequency above the cutoff. Removes noise while
/// still responding to motion.
#[derive(Clone, Debug)]
pub struct LowPassFilter {
    cutoff_frequency: f64,
    time_constant: f64,
    startup_time_s: f64,
    run_time_s: f64,
    is_initialized: bool,
    n_samples: u64,
    n_static: u32,
    filtered_data: Vector3<f64>,
    last_data: Vector3<f64>,
}

impl LowPassFilter {
    pub fn new(cutoff_frequency: f64) -> Self {
        LowPassFilter {
            cutoff_frequency,
            time_constant: 1.0 / (2.0 * std::f64::consts::PI * cutoff_frequency),
            startup_time_s: 1.0 / cutoff_frequency,
            run_time_s: 0.0,
            is_initialized: false,
            n_samples: 0,
            n_static: 0,
            filtered_data: Vector3::zeros(),
            last_data: Vector3::zeros(),
        }
    }

    pub fn add_sample_data(&mut self, sample_data: &Vector3<f64>, delta_t: f64) {
        if !self.is_initialized {
            self.filtered_data = *sample_data;
            self.is_initialized = true;
            return;
        }

        self.run_time_s += delta_t;

        let alpha = delta_t / (self.time_constant + delta_t);
        self.filtered_data = alpha * sample_data + (1.0 - alpha) * self.filtered_data;
        self.n_samples += 1;
        self.last_data = *sample_data;
    }

    pub fn filtered_data(&self) -> Vector3<f64> {
        self.filtered_data
    }

    pub fn filtered_data_norm(&self) -> f64 {
        self.filtered_data.norm()
    }

    pub fn last_data(&self) -> Vector3<f64> {
        self.last_data
    }

    /// Whether enough time has passed for the filtered data to be valid.
    pub fn has_settled(&self) -> bool {
        self.is_initialized && self.run_time_s > self.startup_time_s
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    /// Records whether the last sample was static.
    pub fn set_is_static(&mut self, is_static: bool) {
        if is_static {
            self.n_static += 1;
        } else {
            self.n_static = 0;
        }
    }

    pub fn is_static(&self) -> bool {
        self.is_static_for_n(CONTIGUOUS_STATIC_SAMPLES)
    }

    /// True if all of the previous `number_of_runs` samples were static, as
    /// indicated by calls to `set_is_static`.
    pub fn is_static_for_n(&self, number_of_runs: u32) -> bool {
        self.n_static >= number_of_runs
    }

    pub fn n_static(&self) -> u32 {
        self.n_static
    }

    pub fn run_time(&self) -> f64 {
        self.run_time_s
    }

    pub fn reset(&mut self) {
        self.is_initialized = false;
        self.last_data = Vector3::zeros();
        self.filtered_data = Vector3::zeros();
        self.n_samples = 0;
        self.n_static = 0;
        self.run_time_s = 0.0;
    }

    /// Resets the filter and changes the cutoff frequency.
    pub fn set_cutoff_frequency(&mut self, cutoff_frequency: f64) {
        self.reset();
        self.cutoff_frequency = cutoff_frequency;
        self.time_constant = 1.0 / (2.0 * std::f64::consts::PI * cutoff_frequency);
        self.startup_time_s = 1.0 / cutoff_frequency;
    }
}
