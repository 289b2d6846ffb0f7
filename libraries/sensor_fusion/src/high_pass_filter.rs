//! First-order high-pass IIR filter on 3-vectors.

use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub struct HighPassFilter {
    time_constant: f64,
    is_initialized: bool,
    filtered_data: Vector3<f64>,
    last_data: Vector3<f64>,
}

impl HighPassFilter {
    pub fn new(cutoff_frequency: f64) -> Self {
        HighPassFilter {
            time_constant: 1.0 / (2.0 * std::f64::consts::PI * cutoff_frequency),
            is_initialized: false,
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

        let alpha = delta_t / (self.time_constant + delta_t);
        self.filtered_data = alpha * (sample_data - self.last_data + self.filtered_data);
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

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
}
