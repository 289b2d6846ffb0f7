//! Detection of stationary periods and the gyro-bias correction they enable.
//!
//! Two low-pass filters on the accel/gyro derivatives gate entry into the
//! stationary state; two high-pass filters on the raw samples (plus the raw
//! gyro norm) gate the exit. While stationary, a delayed low-pass of the gyro
//! estimates the bias. This type is not thread-safe.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::delayed_low_pass_filter::DelayedLowPassFilter;
use crate::high_pass_filter::HighPassFilter;
use crate::low_pass_filter::LowPassFilter;

/// Contains all parameters of the stationary detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StationaryDetectorConfig {
    /// Cutoff frequency for the accel low-pass filter, used to determine
    /// entry into the stationary state.
    pub accel_low_pass_cutoff_frequency: f64,
    /// Cutoff frequency for the gyro low-pass filter, used to determine entry
    /// into the stationary state.
    pub gyro_low_pass_cutoff_frequency: f64,
    /// Cutoff frequency for the accel high-pass filter, used to determine
    /// exit from the stationary state.
    pub accel_high_pass_cutoff_frequency: f64,
    /// Cutoff frequency for the gyro high-pass filter, used to determine exit
    /// from the stationary state.
    pub gyro_high_pass_cutoff_frequency: f64,

    /// Gyro norm threshold for exiting the stationary state.
    pub gyro_norm_threshold_rad_per_sec: f64,

    /// Thresholds to determine exit from the stationary state.
    pub accel_high_pass_threshold: f64,
    pub gyro_high_pass_threshold: f64,

    /// Thresholds to determine entry into the stationary state.
    pub accel_low_pass_threshold: f64,
    pub gyro_low_pass_threshold: f64,

    /// Maximum correction in rad/s the detector can apply after convergence.
    /// A larger correction forces the detector out of the stationary state.
    pub max_stationary_gyro_bias_correction: f64,

    /// Cutoff frequency of the delayed low-pass computing gyro bias in the
    /// stationary state.
    pub gyro_correct_low_pass_cutoff_frequency: f64,
    /// Same, during the initialization period.
    pub init_gyro_correct_low_pass_cutoff_frequency_hz: f64,

    /// Seconds the exit condition must stay false before entering the
    /// stationary state.
    pub no_exit_condition_stable_secs: f64,
    /// Same, during the initialization period.
    pub init_no_exit_condition_stable_secs: f64,

    /// Seconds the correction must stay within its bound to count as
    /// converged.
    pub convergence_condition_stable_secs: f64,

    /// Seconds of gyro delay used when computing the correction.
    pub gyro_correction_delay_secs: f64,

    /// Length of the initialization period after the first gyro sample.
    pub initialization_period: f64,

    /// Multiplier for the bias-correction gain during initialization.
    pub init_bias_correction_gain_multiplier: f64,

    /// Gain applied to the gyro bias correction.
    pub stationary_bias_correction_gain: f64,
}

impl Default for StationaryDetectorConfig {
    fn default() -> Self {
        StationaryDetectorConfig {
            accel_low_pass_cutoff_frequency: 1.0,
            gyro_low_pass_cutoff_frequency: 1.0,
            accel_high_pass_cutoff_frequency: 1.0,
            gyro_high_pass_cutoff_frequency: 1.0,
            gyro_norm_threshold_rad_per_sec: 0.15,
            accel_high_pass_threshold: 0.15,
            gyro_high_pass_threshold: 0.02,
            accel_low_pass_threshold: 0.0025,
            gyro_low_pass_threshold: 0.001,
            max_stationary_gyro_bias_correction: 0.0015,
            gyro_correct_low_pass_cutoff_frequency: 0.05,
            init_gyro_correct_low_pass_cutoff_frequency_hz: 0.5,
            no_exit_condition_stable_secs: 10.0,
            init_no_exit_condition_stable_secs: 1.0,
            convergence_condition_stable_secs: 0.1,
            gyro_correction_delay_secs: 1.0,
            initialization_period: 7.0,
            init_bias_correction_gain_multiplier: 10.0,
            stationary_bias_correction_gain: 0.0,
        }
    }
}

/// Tracks how long a boolean condition has held continuously.
#[derive(Clone, Debug, Default)]
struct ConditionTester {
    n_static: u64,
    static_start_timestamp_s: f64,
}

impl ConditionTester {
    /// Whether `condition` has been true for more than `number_of_secs`.
    fn is_stable(&mut self, condition: bool, timestamp_s: f64, number_of_secs: f64) -> bool {
        if condition {
            self.n_static += 1;
            if self.n_static == 1 {
                self.static_start_timestamp_s = timestamp_s;
            }
            (timestamp_s - self.static_start_timestamp_s) > number_of_secs
        } else {
            self.reset();
            false
        }
    }

    fn reset(&mut self) {
        self.n_static = 0;
        self.static_start_timestamp_s = 0.0;
    }
}

pub struct StationaryDetector {
    config: StationaryDetectorConfig,

    accel_low_pass_filter: LowPassFilter,
    gyro_low_pass_filter: LowPassFilter,
    accel_high_pass_filter: HighPassFilter,
    gyro_high_pass_filter: HighPassFilter,

    /// Computes the bias while stationary.
    gyro_bias_delayed_low_pass_filter: DelayedLowPassFilter,

    is_last_accel_initialized: bool,
    is_last_gyro_initialized: bool,

    is_stationary: bool,
    /// When true the detector resets on the next update.
    is_max_correction_threshold_crossed: bool,

    last_gyro_sample: Vector3<f64>,
    last_gyro_timestamp: f64,
    first_gyro_timestamp: f64,
    last_accel_sample: Vector3<f64>,
    last_accel_timestamp: f64,

    has_gyro_bias_correction_converged: bool,

    exit_condition_tester: ConditionTester,
    convergence_condition_tester: ConditionTester,

    stationary_bias_correction_gain: f64,
}

fn is_time_delta_between_samples_valid(delta_t: f64) -> bool {
    delta_t >= 0.0
}

impl StationaryDetector {
    pub fn new(config: StationaryDetectorConfig) -> Self {
        StationaryDetector {
            accel_low_pass_filter: LowPassFilter::new(config.accel_low_pass_cutoff_frequency),
            gyro_low_pass_filter: LowPassFilter::new(config.gyro_low_pass_cutoff_frequency),
            accel_high_pass_filter: HighPassFilter::new(config.accel_high_pass_cutoff_frequency),
            gyro_high_pass_filter: HighPassFilter::new(config.gyro_high_pass_cutoff_frequency),
            gyro_bias_delayed_low_pass_filter: DelayedLowPassFilter::new(
                config.gyro_correction_delay_secs,
                config.init_gyro_correct_low_pass_cutoff_frequency_hz,
            ),
            is_last_accel_initialized: false,
            is_last_gyro_initialized: false,
            is_stationary: false,
            is_max_correction_threshold_crossed: false,
            last_gyro_sample: Vector3::zeros(),
            last_gyro_timestamp: 0.0,
            first_gyro_timestamp: 0.0,
            last_accel_sample: Vector3::zeros(),
            last_accel_timestamp: 0.0,
            has_gyro_bias_correction_converged: false,
            exit_condition_tester: ConditionTester::default(),
            convergence_condition_tester: ConditionTester::default(),
            stationary_bias_correction_gain: config.stationary_bias_correction_gain,
            config,
        }
    }

    /// Adds accelerometer data to the stationary detector.
    pub fn add_accel_measurement(&mut self, accel_sample: &Vector3<f64>, timestamp_s: f64) {
        if !self.is_last_accel_initialized {
            self.last_accel_sample = *accel_sample;
            self.last_accel_timestamp = timestamp_s;
            self.is_last_accel_initialized = true;
        }
        let delta_t = timestamp_s - self.last_accel_timestamp;
        let delta_accel_sample = accel_sample - self.last_accel_sample;

        if is_time_delta_between_samples_valid(delta_t) {
            self.accel_low_pass_filter
                .add_sample_data(&delta_accel_sample, delta_t);
            self.accel_high_pass_filter
                .add_sample_data(accel_sample, delta_t);
        }
        self.last_accel_timestamp = timestamp_s;
        self.last_accel_sample = *accel_sample;
    }

    /// Adds gyroscope data; the detector updates its state on gyro data.
    pub fn add_gyro_measurement(&mut self, gyro_sample: &Vector3<f64>, timestamp_s: f64) {
        if !self.is_last_gyro_initialized {
            self.last_gyro_sample = *gyro_sample;
            self.last_gyro_timestamp = timestamp_s;
            self.first_gyro_timestamp = timestamp_s;
            self.is_last_gyro_initialized = true;
        }
        let delta_t = timestamp_s - self.last_gyro_timestamp;
        let delta_gyro_sample = gyro_sample - self.last_gyro_sample;

        if is_time_delta_between_samples_valid(delta_t) {
            self.gyro_low_pass_filter
                .add_sample_data(&delta_gyro_sample, delta_t);
            self.gyro_high_pass_filter
                .add_sample_data(gyro_sample, delta_t);

            if self.is_stationary {
                self.gyro_bias_delayed_low_pass_filter
                    .add_sample_data(gyro_sample, delta_t);
            }
            self.update(timestamp_s);
        }
        self.last_gyro_timestamp = timestamp_s;
        self.last_gyro_sample = *gyro_sample;
    }

    pub fn is_stationary(&self) -> bool {
        self.is_stationary
    }

    /// Computes the bias correction provided by the stationary detector: the
    /// gain-scaled difference between the externally tracked bias and the
    /// bias estimated while stationary, clamped per component once converged.
    /// Zero while non-stationary or before the delayed estimate is available.
    pub fn gyro_bias_correction(
        &mut self,
        current_external_bias: &Vector3<f64>,
        timestamp_s: f64,
    ) -> Vector3<f64> {
        let Some(stationary_bias) = self.gyro_bias_delayed_low_pass_filter.filtered_data() else {
            return Vector3::zeros();
        };
        if !self.is_stationary {
            return Vector3::zeros();
        }

        let mut stationary_correction = current_external_bias - stationary_bias;
        let max_correction = self.config.max_stationary_gyro_bias_correction;

        // The correction has converged once it stays inside the bound for a
        // short stability window.
        if self.convergence_condition_tester.is_stable(
            stationary_correction.norm() < max_correction,
            timestamp_s,
            self.config.convergence_condition_stable_secs,
        ) {
            self.has_gyro_bias_correction_converged = true;
        }

        // Larger corrections are allowed when entering the stationary state,
        // but the bias should not change drastically after convergence; a
        // diverging correction forces the detector out of stationary.
        if !self.is_initializing()
            && self.has_gyro_bias_correction_converged
            && stationary_correction.norm() > max_correction
        {
            info!(
                correction_norm = stationary_correction.norm(),
                "stationary correction threshold crossed"
            );
            self.is_max_correction_threshold_crossed = true;
            return Vector3::zeros();
        }

        if !self.is_initializing() {
            stationary_correction =
                stationary_correction.map(|c| c.clamp(-max_correction, max_correction));
        }

        let gain = if self.is_initializing() {
            self.config.init_bias_correction_gain_multiplier * self.stationary_bias_correction_gain
        } else {
            self.stationary_bias_correction_gain
        };
        stationary_correction * gain
    }

    /// The detector is more aggressive during initialization so the bias can
    /// converge while the device sits still on early setup screens.
    pub fn is_initializing(&self) -> bool {
        (self.last_gyro_timestamp - self.first_gyro_timestamp) < self.config.initialization_period
    }

    fn update(&mut self, timestamp_s: f64) {
        // All four filters must have data before the state machine runs.
        if !(self.gyro_low_pass_filter.has_settled()
            && self.accel_low_pass_filter.has_settled()
            && self.gyro_high_pass_filter.is_initialized()
            && self.accel_high_pass_filter.is_initialized())
        {
            return;
        }

        let exit_condition = self.accel_high_pass_filter.filtered_data_norm().abs()
            > self.config.accel_high_pass_threshold
            || self.gyro_high_pass_filter.filtered_data_norm().abs()
                > self.config.gyro_high_pass_threshold
            || self.last_gyro_sample.norm() > self.config.gyro_norm_threshold_rad_per_sec
            || self.is_max_correction_threshold_crossed;

        let entry_condition = self.accel_low_pass_filter.filtered_data_norm().abs()
            < self.config.accel_low_pass_threshold
            && self.gyro_low_pass_filter.filtered_data_norm().abs()
                < self.config.gyro_low_pass_threshold;

        // The exit condition must stay false for a dwell period before the
        // detector may enter the stationary state.
        let stability_secs = if self.is_initializing() {
            self.config.init_no_exit_condition_stable_secs
        } else {
            self.config.no_exit_condition_stable_secs
        };
        let no_exit_stable_condition =
            self.exit_condition_tester
                .is_stable(!exit_condition, timestamp_s, stability_secs);

        if self.is_stationary {
            if exit_condition {
                info!(
                    accel_hp = self.accel_high_pass_filter.filtered_data_norm(),
                    gyro_hp = self.gyro_high_pass_filter.filtered_data_norm(),
                    gyro_norm = self.last_gyro_sample.norm(),
                    "exit stationary state"
                );
                self.reset();
            }
        } else if entry_condition && no_exit_stable_condition {
            info!(stability_secs, "enter stationary state");
            self.is_stationary = true;
        }
    }

    /// Resets the stationary detector to the non-stationary state.
    pub fn reset(&mut self) {
        self.is_stationary = false;
        self.is_max_correction_threshold_crossed = false;
        self.has_gyro_bias_correction_converged = false;
        self.gyro_bias_delayed_low_pass_filter.reset();
        if !self.is_initializing() {
            self.gyro_bias_delayed_low_pass_filter
                .set_cutoff_frequency(self.config.gyro_correct_low_pass_cutoff_frequency);
        }
        self.convergence_condition_tester.reset();
        self.exit_condition_tester.reset();
    }
}
