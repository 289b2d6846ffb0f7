//! Mahony-style complementary orientation filter.
//!
//! The filter state is a 7-vector: a JPL unit quaternion (world to sensor)
//! in components 0..4 and the gyroscope bias in rad/s in components 4..7.
//! Gyro integration drives the attitude; a rate correction derived from the
//! accelerometer (gravity alignment) and optionally the magnetometer (yaw
//! alignment) is injected into the integrator with separate attitude and
//! bias feedback gains.

use nalgebra::{DVector, Matrix3, SVector, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::geometry;
use crate::low_pass_filter::LowPassFilter;
use crate::quaternion_integrator::QuaternionIntegrator;
use crate::stationary_detector::{StationaryDetector, StationaryDetectorConfig};

/// Minimum time step between sensor updates; corresponds to 1000 Hz.
const MIN_TIMESTEP_S: f64 = 0.001;
/// Maximum time step between sensor updates; corresponds to 1 Hz.
const MAX_TIMESTEP_S: f64 = 1.0;
/// Gravity constant in m/s^2.
const MAGNITUDE_OF_GRAVITY: f64 = 9.81;
/// Small threshold to check if close to zero.
const EPSILON: f64 = 1e-9;
/// Number of runs the mag bias correction must remain static; just under a
/// second at 60 Hz.
const MAG_BIAS_CORRECTION_STATIC_COUNT: u32 = 40;
/// Small threshold used for mag initialization.
const MAG_INIT_TOLERANCE: f64 = 1e-6;
/// Number of mag samples buffered for yaw alignment; about 0.4 s at 60 Hz.
const NUM_MAG_FOR_INITIALIZATION: usize = 25;
/// Number of contiguous mag outliers that temporarily disables mag fusion
/// until a new calibration arrives.
const NUM_MAG_FOR_FILTER_OUTLIER_REJECTION: u32 = 10;
/// Rejection threshold for a single mag measurement, 5 degrees in radians.
const MAX_ALLOWED_MAG_DEVIATION_RADIANS: f64 = 0.0872665;
/// Mag samples older than this relative to the current gyro sample are
/// dropped rather than fused.
const MAX_TIME_DIFFERENCE_IN_MAG_AND_GYRO_S: f64 = 0.003;

fn is_timestamp_delta_valid(timestamp_delta_s: f64) -> bool {
    timestamp_delta_s > MIN_TIMESTEP_S && timestamp_delta_s <= MAX_TIMESTEP_S
}

/// Whether the magnetometer takes part in setting up the initial coordinate
/// system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialOrientationConfig {
    UseMagToInitOrientation,
    DontUseMagToInitOrientation,
}

/// Contains all parameters of the filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrientationFilterConfig {
    /// Controls the gravity estimation feedback. A high value increases the
    /// influence of the gravity estimate on the orientation.
    pub attitude_correction_gain: f64,
    /// Controls the bias estimation feedback. A high value decreases the time
    /// to adapt to gyroscope bias but can result in a tilting horizon.
    pub gyroscope_bias_correction_gain: f64,
    /// Controls the yaw correction feedback for the magnetometer. Not active
    /// by default.
    pub mag_yaw_correction_gain: f64,
    /// Controls the yaw correction feedback for the accelerometer.
    pub accel_yaw_correction_gain: f64,
    /// Gain applied to the gyro-bias correction estimated from the
    /// magnetometer.
    pub magnetometer_gain_for_gyroscope_bias_estimation: f64,
    /// Gain applied to the gyro-bias correction estimated from the stationary
    /// detector.
    pub stationary_bias_correction_gain: f64,
    /// Gravity feedback gain used instead of `attitude_correction_gain`
    /// during initialization, to help the filter converge faster.
    pub attitude_correction_gain_during_initialization: f64,
    /// Length of the initialization period.
    pub initialization_period_s: f64,
    /// Maximum change in magnetometer magnitude (in micro Tesla) for a
    /// sample to be used in bias estimation.
    pub maximum_allowed_magnitude_magnetometer_change_mt: f64,
    /// Cutoff frequency of the magnetometer low-pass filter.
    pub magnetometer_low_pass_cutoff_frequency: f64,
    /// Maximum gyro norm for which the mag bias correction is applied.
    pub maximum_allowed_gyro_norm_changed_for_mag_bias_correction: f64,
    /// Whether to use the mag when setting up the coordinate system.
    pub init_config: InitialOrientationConfig,
    /// Initial magnetometer bias (x, y, z) in micro Tesla.
    pub init_mag_bias: Vector3<f64>,
}

impl Default for OrientationFilterConfig {
    fn default() -> Self {
        OrientationFilterConfig {
            attitude_correction_gain: 2.0,
            gyroscope_bias_correction_gain: 0.1,
            mag_yaw_correction_gain: 0.0,
            accel_yaw_correction_gain: 1.0,
            magnetometer_gain_for_gyroscope_bias_estimation: 1.0,
            stationary_bias_correction_gain: 0.0,
            attitude_correction_gain_during_initialization: 15.0,
            initialization_period_s: 1.0,
            maximum_allowed_magnitude_magnetometer_change_mt: 2.0,
            magnetometer_low_pass_cutoff_frequency: 1.0,
            maximum_allowed_gyro_norm_changed_for_mag_bias_correction: 0.1,
            init_config: InitialOrientationConfig::DontUseMagToInitOrientation,
            init_mag_bias: Vector3::zeros(),
        }
    }
}

/// Status of magnetometer alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MagStatus {
    Initial,
    Aligning,
    Aligned,
}

/// Token handed out when registering a bad-calibration callback; used to
/// unregister it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackToken(u64);

#[derive(Clone, Copy, Debug, Default)]
struct SensorSample {
    sample: Vector3<f64>,
    timestamp_s: f64,
}

impl SensorSample {
    fn new(sample: Vector3<f64>, timestamp_s: f64) -> Self {
        SensorSample {
            sample,
            timestamp_s,
        }
    }
}

pub struct OrientationFilter {
    config: OrientationFilterConfig,

    quaternion_integrator: QuaternionIntegrator,

    /// state[0..4] quaternion world to sensor, state[4..7] gyro bias in rad/s.
    state: SVector<f64, 7>,
    next_state: SVector<f64, 7>,
    state_from_previous_mag: SVector<f64, 7>,

    current_accel_measurement: SensorSample,
    current_gyro_measurement: SensorSample,
    current_mag_measurement: SensorSample,
    previous_mag_measurement: SensorSample,
    previous_gyro_measurement: SensorSample,

    is_orientation_initialized: bool,
    first_accel_timestamp_s: f64,
    has_received_gyro_sample: bool,
    mag_is_available: bool,

    on_bad_mag_calibration_detected_callbacks: Vec<(CallbackToken, Box<dyn Fn() + Send>)>,
    next_callback_token: u64,

    mag_low_pass_filter: LowPassFilter,

    /// Rotation about yaw between the mag-aligned global frame (local
    /// East-North-Up) and the accel-aligned frame generated during filter
    /// initialization.
    accel_aligned_r_yaw_mag_aligned: Matrix3<f64>,

    num_mag_measurements_for_yaw_initialization: usize,
    mag_meas_for_init_index: usize,
    projected_mag_measurement_vector: Vec<Vector3<f64>>,

    mag_bias: Vector3<f64>,
    new_mag_calibration_available: bool,
    mag_status: MagStatus,
    accumulated_num_of_outlier_mag_measurement: u32,
    current_mag_sample_fits_calibration: bool,

    stationary_detector: StationaryDetector,
}

impl OrientationFilter {
    pub fn new(config: OrientationFilterConfig) -> Self {
        let stationary_config = StationaryDetectorConfig {
            stationary_bias_correction_gain: config.stationary_bias_correction_gain,
            ..StationaryDetectorConfig::default()
        };

        let mut state = SVector::<f64, 7>::zeros();
        state[3] = 1.0;

        let mut filter = OrientationFilter {
            quaternion_integrator: QuaternionIntegrator::new(),
            state,
            next_state: state,
            state_from_previous_mag: state,
            current_accel_measurement: SensorSample::default(),
            current_gyro_measurement: SensorSample::default(),
            current_mag_measurement: SensorSample::default(),
            previous_mag_measurement: SensorSample::default(),
            previous_gyro_measurement: SensorSample::default(),
            is_orientation_initialized: false,
            first_accel_timestamp_s: 0.0,
            has_received_gyro_sample: false,
            mag_is_available: false,
            on_bad_mag_calibration_detected_callbacks: Vec::new(),
            next_callback_token: 0,
            mag_low_pass_filter: LowPassFilter::new(config.magnetometer_low_pass_cutoff_frequency),
            accel_aligned_r_yaw_mag_aligned: Matrix3::identity(),
            num_mag_measurements_for_yaw_initialization: NUM_MAG_FOR_INITIALIZATION,
            mag_meas_for_init_index: 0,
            projected_mag_measurement_vector: vec![
                Vector3::zeros();
                NUM_MAG_FOR_INITIALIZATION
            ],
            mag_bias: Vector3::zeros(),
            new_mag_calibration_available: false,
            mag_status: MagStatus::Initial,
            accumulated_num_of_outlier_mag_measurement: 0,
            current_mag_sample_fits_calibration: false,
            stationary_detector: StationaryDetector::new(stationary_config),
            config,
        };

        if filter.config.init_mag_bias != Vector3::zeros() {
            let init_mag_bias = filter.config.init_mag_bias;
            filter.set_mag_bias(&init_mag_bias);
        }
        filter
    }

    /// Registers a callback invoked every time a bad mag calibration is
    /// detected, returning a token for unregistration.
    pub fn register_on_bad_mag_calibration_detected_callback(
        &mut self,
        callback: Box<dyn Fn() + Send>,
    ) -> CallbackToken {
        let token = CallbackToken(self.next_callback_token);
        self.next_callback_token += 1;
        self.on_bad_mag_calibration_detected_callbacks
            .push((token, callback));
        token
    }

    pub fn unregister_on_bad_mag_calibration_detected_callback(&mut self, token: CallbackToken) {
        self.on_bad_mag_calibration_detected_callbacks
            .retain(|(t, _)| *t != token);
    }

    fn bad_magnetometer_calibration_detected_broadcast(&self) {
        for (_, callback) in &self.on_bad_mag_calibration_detected_callbacks {
            callback();
        }
    }

    /// Runs an initialization attempt and, once initialized, one propagation
    /// step.
    fn run(&mut self) {
        if !self.is_orientation_initialized
            && self.current_accel_measurement.timestamp_s > 0.0
            && (self.config.init_config == InitialOrientationConfig::DontUseMagToInitOrientation
                || self.current_mag_measurement.timestamp_s > 0.0)
        {
            self.is_orientation_initialized = self.orientation_from_accel_and_mag();
        }

        // Only start to propagate once the orientation has been initialized
        // from accel / mag.
        if self.is_orientation_initialized {
            self.filter_propagate();
        }
    }

    pub fn add_accel_measurement(&mut self, sample: &Vector3<f64>, timestamp_s: f64) {
        if self.first_accel_timestamp_s == 0.0 {
            self.first_accel_timestamp_s = timestamp_s;
            if self.is_orientation_initialized {
                // Check that the state is aligned with gravity; fix it if not.
                let g_from_acc = sample.normalize();
                let g_est = self.compute_gravity_estimate();

                let dot_product = g_from_acc.dot(&g_est).clamp(-1.0, 1.0);
                let angular_error_deg = dot_product.acos().to_degrees();
                if angular_error_deg.abs() > 44.0 {
                    // The error after a pose reset is too large; correct the
                    // gravity alignment directly.
                    let correction_quat = geometry::rotate_into(&g_est, &g_from_acc);
                    let corrected = geometry::quaternion_multiplication(
                        &correction_quat,
                        &self.orientation(),
                    );
                    self.state.fixed_rows_mut::<4>(0).copy_from(&corrected);
                }
            }
        }

        self.current_accel_measurement = SensorSample::new(*sample, timestamp_s);

        if self.is_stationary_bias_correction_enabled() {
            self.stationary_detector
                .add_accel_measurement(sample, timestamp_s);
        }

        if !self.has_received_gyro_sample {
            // No gyro yet; synthesize a zero-rate sample so every accel
            // sample still advances the filter.
            self.current_gyro_measurement = SensorSample::new(Vector3::zeros(), timestamp_s);
            self.run();
        }
    }

    pub fn add_gyro_measurement(&mut self, sample: &Vector3<f64>, timestamp_s: f64) {
        self.current_gyro_measurement = SensorSample::new(*sample, timestamp_s);

        if self.is_stationary_bias_correction_enabled() {
            self.stationary_detector
                .add_gyro_measurement(sample, timestamp_s);
        }

        let delta_t_s = timestamp_s - self.previous_gyro_measurement.timestamp_s;
        if is_timestamp_delta_valid(delta_t_s) {
            self.has_received_gyro_sample = true;
            self.run();
        }

        self.previous_gyro_measurement = self.current_gyro_measurement;
    }

    /// Adds a magnetometer measurement. `fits_calibration` is true when the
    /// sample fits the current calibration, false for outliers or while no
    /// calibration exists yet.
    pub fn add_mag_measurement(
        &mut self,
        sample: &Vector3<f64>,
        timestamp_s: f64,
        fits_calibration: bool,
    ) {
        // The first sample only sets up the timeline.
        if self.current_mag_measurement.timestamp_s == 0.0 {
            self.current_mag_measurement = SensorSample::new(*sample, timestamp_s);
            self.current_mag_sample_fits_calibration = fits_calibration;
            return;
        }

        let mag_delta_time_s = timestamp_s - self.previous_mag_measurement.timestamp_s;

        // Uncalibrated mag bias tracking only runs when the stationary
        // correction is not enabled.
        if !self.is_stationary_bias_correction_enabled() {
            self.mag_low_pass_filter
                .add_sample_data(sample, mag_delta_time_s);
            if self.mag_low_pass_filter.is_initialized() {
                self.previous_mag_measurement = SensorSample::new(
                    self.mag_low_pass_filter.filtered_data(),
                    self.current_mag_measurement.timestamp_s,
                );
            }
        } else {
            self.previous_mag_measurement = self.current_mag_measurement;
        }

        self.current_mag_measurement = SensorSample::new(*sample, timestamp_s);
        self.current_mag_sample_fits_calibration = fits_calibration;

        self.mag_is_available = is_timestamp_delta_valid(mag_delta_time_s);
    }

    /// Current orientation quaternion (JPL, world to sensor).
    pub fn orientation(&self) -> Vector4<f64> {
        self.state.fixed_rows::<4>(0).into_owned()
    }

    /// Bias-compensated rotational velocity of the latest gyro sample.
    pub fn rotational_velocity(&self) -> Vector3<f64> {
        self.current_gyro_measurement.sample - self.gyro_bias()
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.state.fixed_rows::<3>(4).into_owned()
    }

    /// Sets the pose and re-initializes the tracker.
    pub fn set_orientation(&mut self, orientation: &Vector4<f64>) {
        self.state.fixed_rows_mut::<4>(0).copy_from(orientation);
        self.is_orientation_initialized = true;
        self.first_accel_timestamp_s = 0.0;
    }

    pub fn set_gyro_bias(&mut self, gyro_bias: &Vector3<f64>) {
        self.state.fixed_rows_mut::<3>(4).copy_from(gyro_bias);
    }

    pub fn set_mag_bias(&mut self, mag_bias: &Vector3<f64>) {
        self.mag_bias = *mag_bias;
        self.new_mag_calibration_available = true;
        self.state_from_previous_mag = self.state;
    }

    pub fn mag_bias(&self) -> Vector3<f64> {
        self.mag_bias
    }

    pub fn set_last_gyroscope_measurement(&mut self, gyro_sample: &Vector3<f64>, timestamp_s: f64) {
        self.previous_gyro_measurement = SensorSample::new(*gyro_sample, timestamp_s);
    }

    /// Should only be called while the tracker is paused.
    pub fn last_gyroscope_sample(&self) -> Vector3<f64> {
        self.current_gyro_measurement.sample
    }

    /// Should only be called while the tracker is paused.
    pub fn last_gyroscope_timestamp(&self) -> f64 {
        self.current_gyro_measurement.timestamp_s
    }

    pub fn is_last_mag_sample_fit_calibration(&self) -> bool {
        self.current_mag_sample_fits_calibration
    }

    /// True once a first orientation was computed; requires a valid accel
    /// (and, if configured, mag) measurement.
    pub fn is_orientation_set(&self) -> bool {
        self.is_orientation_initialized
    }

    pub fn is_fully_initialized(&self) -> bool {
        self.is_orientation_set() && !self.is_initializing()
    }

    /// Gravity estimate derived from the current pose.
    pub fn compute_gravity_estimate(&self) -> Vector3<f64> {
        geometry::quaternion_to_rotation_matrix(&self.orientation())
            .column(2)
            .into_owned()
    }

    fn is_initializing(&self) -> bool {
        self.is_orientation_set()
            && (self.current_accel_measurement.timestamp_s - self.first_accel_timestamp_s)
                < self.config.initialization_period_s
    }

    /// When stationary bias correction is enabled the uncalibrated mag bias
    /// estimation is not used.
    fn is_stationary_bias_correction_enabled(&self) -> bool {
        self.config.stationary_bias_correction_gain > 0.0
    }

    /// Computes the initial orientation from the current accel (and, if
    /// configured, mag) measurement.
    ///
    /// East-North-Up frame of reference: the gravity vector lies along +z,
    /// the horizontal component of the mag vector along +y, and x points
    /// east.
    fn orientation_from_accel_and_mag(&mut self) -> bool {
        let l_z: Vector3<f64> = self.current_accel_measurement.sample.normalize();

        let mut l_y;
        match self.config.init_config {
            InitialOrientationConfig::DontUseMagToInitOrientation => {
                // Depending on whether the device is held in portrait or
                // landscape, this is the axis gravity should point along if
                // the device is right-side-up.
                let canonical_down;
                if l_z.dot(&Vector3::y()).abs() < l_z.dot(&Vector3::x()).abs() {
                    // Landscape.
                    l_y = Vector3::y();
                    canonical_down = Vector3::x();
                } else {
                    // Portrait.
                    l_y = -Vector3::x();
                    canonical_down = Vector3::y();
                }
                // Right-side-up or upside-down?
                if l_z.dot(&canonical_down) < 0.0 {
                    l_y = -l_y;
                }
            }
            InitialOrientationConfig::UseMagToInitOrientation => {
                l_y = self.current_mag_measurement.sample.normalize();
                l_y -= l_z * l_z.transpose() * l_y;
            }
        }

        let mut l_x = -l_z.cross(&l_y);
        if l_x.norm() == 0.0 {
            return false;
        }
        l_x /= l_x.norm();

        let l_y = l_z.cross(&l_x);
        if l_y.norm() == 0.0 {
            return false;
        }

        let mut l_r_g = Matrix3::zeros();
        l_r_g.set_column(0, &l_x);
        l_r_g.set_column(1, &l_y);
        l_r_g.set_column(2, &l_z);

        let q = geometry::rotation_matrix_to_quaternion(&l_r_g);
        self.state.fixed_rows_mut::<4>(0).copy_from(&q);

        self.state_from_previous_mag = self.state;
        self.mag_is_available = false;
        true
    }

    /// One propagation step over the interval between the previous and the
    /// current gyro sample.
    fn filter_propagate(&mut self) {
        let delta_t = self.current_gyro_measurement.timestamp_s
            - self.previous_gyro_measurement.timestamp_s;
        if !is_timestamp_delta_valid(delta_t) {
            return;
        }

        // Ignore the current mag measurement if it is too old relative to the
        // gyro timeline.
        if self.mag_is_available {
            let gyro_time_ahead = self.current_gyro_measurement.timestamp_s
                - self.current_mag_measurement.timestamp_s;
            if gyro_time_ahead > MAX_TIME_DIFFERENCE_IN_MAG_AND_GYRO_S {
                self.mag_is_available = false;
            }
        }

        let rate_correction = self.compute_accel_and_mag_rate_correction();
        let attitude_gain = if self.is_initializing() {
            self.config.attitude_correction_gain_during_initialization
        } else {
            self.config.attitude_correction_gain
        };

        // Bias-compensate both paired gyro samples and inject the attitude
        // correction as a rate.
        let correction = -self.gyro_bias() + attitude_gain * rate_correction;
        let mut gyro_measurements = SVector::<f64, 6>::zeros();
        gyro_measurements
            .fixed_rows_mut::<3>(0)
            .copy_from(&(self.previous_gyro_measurement.sample + correction));
        gyro_measurements
            .fixed_rows_mut::<3>(3)
            .copy_from(&(self.current_gyro_measurement.sample + correction));

        let current_q = self.orientation();
        let next_q = self
            .quaternion_integrator
            .integrate(&current_q, &gyro_measurements, delta_t);
        self.next_state.fixed_rows_mut::<4>(0).copy_from(&next_q);

        let bias_gain = if self.is_initializing() {
            0.0
        } else {
            self.config.gyroscope_bias_correction_gain
        };
        let mut next_bias = self.gyro_bias() - bias_gain * delta_t * rate_correction;

        if self.is_stationary_bias_correction_enabled() {
            next_bias -= delta_t
                * self.stationary_detector.gyro_bias_correction(
                    &next_bias,
                    self.current_gyro_measurement.timestamp_s,
                );
        }
        self.next_state.fixed_rows_mut::<3>(4).copy_from(&next_bias);
        self.state = self.next_state;

        if self.mag_is_available {
            let mag_delta_t = self.current_mag_measurement.timestamp_s
                - self.previous_mag_measurement.timestamp_s;
            if !self.is_stationary_bias_correction_enabled() {
                let mag_correction = self.estimate_bias_update_using_mag();
                let bias = self.gyro_bias()
                    - mag_delta_t
                        * self.config.magnetometer_gain_for_gyroscope_bias_estimation
                        * mag_correction;
                self.state.fixed_rows_mut::<3>(4).copy_from(&bias);
            }

            self.state_from_previous_mag = self.state;
            self.mag_is_available = false;
        }
    }

    /// Estimates an update to the gyro bias from the change in magnetic-north
    /// direction between the previous and the current (low-passed) mag
    /// sample, gated on the device being still.
    fn estimate_bias_update_using_mag(&mut self) -> Vector3<f64> {
        if !self.mag_low_pass_filter.is_initialized() {
            return Vector3::zeros();
        }

        // Only estimate drift when the device is still: the gyro signal is
        // then most likely pure drift and the mag signal close to noise.
        let is_gyro_static = self.current_gyro_measurement.sample.norm()
            < self
                .config
                .maximum_allowed_gyro_norm_changed_for_mag_bias_correction;
        let is_mag_static = (self.previous_mag_measurement.sample
            - self.mag_low_pass_filter.filtered_data())
        .norm()
            < self.config.maximum_allowed_magnitude_magnetometer_change_mt;
        self.mag_low_pass_filter
            .set_is_static(is_gyro_static && is_mag_static);

        if !self
            .mag_low_pass_filter
            .is_static_for_n(MAG_BIAS_CORRECTION_STATIC_COUNT)
        {
            return Vector3::zeros();
        }

        // Down and north directions from both the previous-mag-time state and
        // the current state.
        let previous_rotation = geometry::quaternion_to_rotation_matrix(
            &self.state_from_previous_mag.fixed_rows::<4>(0).into_owned(),
        );
        let current_rotation = geometry::quaternion_to_rotation_matrix(&self.orientation());
        let previous_accel_est = previous_rotation.column(2).into_owned();
        let previous_mag_est = previous_rotation.column(1).into_owned();
        let current_accel_est = current_rotation.column(2).into_owned();
        let current_mag_est = current_rotation.column(1).into_owned();

        // Previous mag with gravity removed, normalized.
        let mut previous_mag_meas = self.previous_mag_measurement.sample;
        previous_mag_meas -=
            previous_accel_est * previous_accel_est.transpose() * previous_mag_meas;
        previous_mag_meas.normalize_mut();

        // Current (low-passed) mag with gravity removed, normalized.
        let mut mag_meas = self.mag_low_pass_filter.filtered_data();
        mag_meas -= current_accel_est * current_accel_est.transpose() * mag_meas;
        mag_meas.normalize_mut();

        mag_meas.cross(&previous_mag_meas) - current_mag_est.cross(&previous_mag_est)
    }

    /// Computes the accel + mag rate correction injected into the gyro
    /// integrator.
    fn compute_accel_and_mag_rate_correction(&mut self) -> Vector3<f64> {
        let mut accel_meas = self.current_accel_measurement.sample;
        let accel_magnitude = accel_meas.norm();
        if accel_magnitude < 1e-6 {
            return Vector3::zeros();
        }

        accel_meas.normalize_mut();
        let l_r_g_accel_aligned = geometry::quaternion_to_rotation_matrix(&self.orientation());
        let accel_est: Vector3<f64> = l_r_g_accel_aligned.column(2).into_owned();

        // Dampen the effect of body acceleration. Skipped while initializing
        // because it would slow down convergence.
        let mut gain = 1.0;
        let gyro_norm = self.current_gyro_measurement.sample.norm();
        if !self.is_initializing() {
            // Don't trust the accel when it deviates from 1 g.
            gain /= 1.0 + (accel_magnitude - MAGNITUDE_OF_GRAVITY).abs();

            // Don't update the filter while moving too fast. Full gain below
            // 0.1 rad/s, dampened linearly to zero between 0.1 and 0.3.
            gain *= (1.5 - 5.0 * gyro_norm).clamp(0.0, 1.0);
        } else {
            // Tighter ramp during initialization: full gain below 0.04 rad/s,
            // dampened to zero between 0.04 and 0.1.
            gain *= (1.5 - 15.0 * gyro_norm).clamp(0.0, 1.0);
        }

        let mut rate_correction_vector: Vector3<f64> =
            gain / 2.0 * self.config.accel_yaw_correction_gain * accel_meas.cross(&accel_est);

        // Check if there is a valid mag sample ready to be consumed.
        if self.mag_is_available
            && self.current_mag_sample_fits_calibration
            && self.config.mag_yaw_correction_gain > 0.0
            && self.current_mag_measurement.timestamp_s > 0.0
        {
            if self.new_mag_calibration_available {
                // Invalidate the existing mag alignment and force recompute.
                self.mag_status = MagStatus::Aligning;
                self.mag_meas_for_init_index = 0;
                info!("received new mag bias, estimating alignment");
                self.new_mag_calibration_available = false;
            }

            let current_calibrated_mag_measurement =
                self.current_mag_measurement.sample - self.mag_bias;

            // Estimated mag value projected on yaw, represented locally.
            let mut mag_est_projection = current_calibrated_mag_measurement;
            mag_est_projection -= accel_est * accel_est.transpose() * mag_est_projection;
            mag_est_projection.normalize_mut();

            // Estimate the alignment between the filter orientation and
            // magnetic north.
            if self.mag_status == MagStatus::Aligning {
                // Buffer the projected mag for the iterative solver.
                self.projected_mag_measurement_vector[self.mag_meas_for_init_index] =
                    l_r_g_accel_aligned.transpose() * mag_est_projection;
                self.mag_meas_for_init_index += 1;

                if self.mag_meas_for_init_index
                    == self.num_mag_measurements_for_yaw_initialization
                {
                    match self.compute_yaw_alignment_matrix() {
                        Some(alignment) => {
                            self.accel_aligned_r_yaw_mag_aligned = alignment;
                            self.mag_status = MagStatus::Aligned;
                        }
                        None => {
                            // Alignment failed; restart data collection.
                            self.mag_meas_for_init_index = 0;
                            info!("mag alignment failed in orientation tracker, will retry");
                        }
                    }
                }
            }

            let mut mag_meas = current_calibrated_mag_measurement;
            mag_meas -= accel_meas * accel_meas.transpose() * mag_meas;
            if mag_meas.norm() < 1e-6 {
                return rate_correction_vector;
            }
            mag_meas.normalize_mut();

            if self.mag_status == MagStatus::Aligned {
                // The magnetometer is calibrated and aligned with the filter,
                // so it can correct yaw.
                self.mag_is_available = false;

                let mag_est: Vector3<f64> = (l_r_g_accel_aligned
                    * self.accel_aligned_r_yaw_mag_aligned)
                    .column(1)
                    .into_owned();

                let angle_between_est_and_meas = mag_est_projection.dot(&mag_est).acos();
                if angle_between_est_and_meas > MAX_ALLOWED_MAG_DEVIATION_RADIANS {
                    self.accumulated_num_of_outlier_mag_measurement += 1;
                    if self.accumulated_num_of_outlier_mag_measurement
                        > NUM_MAG_FOR_FILTER_OUTLIER_REJECTION
                    {
                        // Invalidate the existing alignment and recompute.
                        self.mag_status = MagStatus::Aligning;
                        self.state_from_previous_mag = self.state;
                        self.mag_meas_for_init_index = 0;
                        warn!("consistently received outlier mag measurements, resetting");
                        self.bad_magnetometer_calibration_detected_broadcast();
                        self.accumulated_num_of_outlier_mag_measurement = 0;
                    }
                } else {
                    rate_correction_vector +=
                        self.config.mag_yaw_correction_gain * mag_meas.cross(&mag_est);
                    self.accumulated_num_of_outlier_mag_measurement = 0;
                }
            }
        }

        rate_correction_vector
    }

    /// Solves for the single yaw angle aligning the buffered mag projections
    /// with magnetic north via Gauss-Newton.
    fn compute_iterative_solution(
        &self,
        mag_vector: &DVector<f64>,
        initial_solution: f64,
    ) -> Option<Matrix3<f64>> {
        const MAX_ITERATIONS: usize = 25;
        const NORM_CORRECTION_FOR_CONVERGENCE: f64 = 1e-5;

        let mut current_solution = initial_solution;
        let mut current_iteration = 0;
        while current_iteration < MAX_ITERATIONS {
            let z_est = Vector2::new(-current_solution.sin(), current_solution.cos());
            let jacobian = Vector2::new(-current_solution.cos(), -current_solution.sin());

            let mut residual = 0.0;
            let mut hessian = 0.0;
            for i in 0..mag_vector.len() / 2 {
                let residual_i = z_est - mag_vector.fixed_rows::<2>(i * 2);
                residual += (jacobian.transpose() * residual_i)[0];
                hessian += jacobian.dot(&jacobian);
            }

            if hessian < MAG_INIT_TOLERANCE {
                // Invalid Hessian; mag initialization fails.
                return None;
            }
            let correction = -residual / hessian;
            current_solution += correction;

            if correction.abs() < NORM_CORRECTION_FOR_CONVERGENCE {
                break;
            }
            current_iteration += 1;
        }

        if current_iteration >= MAX_ITERATIONS {
            // Maximum iterations reached; mag initialization fails.
            return None;
        }

        let (sin, cos) = current_solution.sin_cos();
        Some(Matrix3::new(
            cos, -sin, 0.0, //
            sin, cos, 0.0, //
            0.0, 0.0, 1.0,
        ))
    }

    /// Normalizes the horizontal components of the buffered mag projections
    /// and runs the iterative yaw solver on them.
    fn compute_yaw_alignment_matrix(&self) -> Option<Matrix3<f64>> {
        let num_rows = 2 * self.projected_mag_measurement_vector.len();
        let mut mag_vector = DVector::<f64>::zeros(num_rows);
        for (i, projection) in self.projected_mag_measurement_vector.iter().enumerate() {
            let horizontal = Vector2::new(projection[0], projection[1]);
            if horizontal.norm_squared() < MAG_INIT_TOLERANCE {
                return None;
            }
            mag_vector
                .fixed_rows_mut::<2>(i * 2)
                .copy_from(&horizontal.normalize());
        }

        let init_solution = -mag_vector[0].atan2(mag_vector[1]);
        self.compute_iterative_solution(&mag_vector, init_solution)
    }

    /// Resets the yaw angle to zero while keeping pitch and roll identical.
    ///
    /// Two constraints fix the recentered rotation: its gravity column equals
    /// the current one, and the heading column's z-component is zero. The
    /// middle column follows from unit length and orthogonality to the
    /// gravity column; the first column completes the frame via the cross
    /// product.
    pub fn recenter(&mut self) {
        let l_r_g = geometry::quaternion_to_rotation_matrix(&self.orientation());

        let mut recentered = Matrix3::zeros();
        // Keep the down direction.
        recentered.set_column(2, &l_r_g.column(2).into_owned());

        if l_r_g[(0, 2)].abs() < EPSILON {
            // Arbitrarily use the x axis.
            recentered[(0, 1)] = 1.0;
            recentered[(1, 1)] = 0.0;
        } else {
            let x_y_ratio = l_r_g[(1, 2)] / l_r_g[(0, 2)];
            // The sign is kept positive to enforce forwardness.
            recentered[(1, 1)] = (1.0 / (1.0 + x_y_ratio * x_y_ratio)).sqrt();
            recentered[(0, 1)] = -recentered[(1, 1)] * x_y_ratio;
        }
        recentered[(2, 1)] = 0.0;

        // Orthogonality for the first column.
        let column0 = recentered.column(1).cross(&recentered.column(2));
        recentered.set_column(0, &column0);

        let q = geometry::rotation_matrix_to_quaternion(&recentered);
        self.state.fixed_rows_mut::<4>(0).copy_from(&q);

        // The pose jump from recentering must not feed the mag-based bias
        // update.
        self.state_from_previous_mag = self.state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn default_filter() -> OrientationFilter {
        OrientationFilter::new(OrientationFilterConfig::default())
    }

    #[test]
    fn set_and_get_gyro_bias() {
        let mut filter = default_filter();
        let gyro_bias = Vector3::new(1.0, 2.0, 3.0);
        filter.set_gyro_bias(&gyro_bias);
        assert_eq!(filter.gyro_bias(), gyro_bias);
    }

    #[test]
    fn set_and_get_mag_bias() {
        let mut filter = default_filter();
        let mag_bias = Vector3::new(1.0, 2.0, 3.0);
        filter.set_mag_bias(&mag_bias);
        assert_eq!(filter.mag_bias(), mag_bias);
    }

    #[test]
    fn set_and_get_orientation() {
        let mut filter = default_filter();
        let orientation = Vector4::new(1.0, 2.0, 3.0, 4.0);
        filter.set_orientation(&orientation);
        assert_eq!(filter.orientation(), orientation);
        assert!(filter.is_orientation_set());
    }

    #[test]
    fn add_gyro_measurement_records_the_sample() {
        let mut filter = default_filter();
        let gyro_sample = Vector3::new(1.0, 2.0, 3.0);
        filter.add_gyro_measurement(&gyro_sample, 0.1);
        assert_eq!(filter.last_gyroscope_sample(), gyro_sample);
        assert_eq!(filter.last_gyroscope_timestamp(), 0.1);
    }

    #[test]
    fn mag_fit_calibration_flag_tracks_the_last_sample() {
        let mut filter = default_filter();
        let mag_sample = Vector3::new(1.0, 2.0, 3.0);
        filter.add_mag_measurement(&mag_sample, 0.1, false);
        assert!(!filter.is_last_mag_sample_fit_calibration());
        filter.add_mag_measurement(&mag_sample, 0.2, true);
        assert!(filter.is_last_mag_sample_fit_calibration());
    }

    #[test]
    fn rotational_velocity_is_bias_compensated() {
        let mut filter = default_filter();
        let bias = Vector3::new(0.01, -0.02, 0.005);
        filter.set_gyro_bias(&bias);
        let sample = Vector3::new(0.5, 0.25, -0.1);
        filter.add_gyro_measurement(&sample, 0.1);
        assert_relative_eq!(filter.rotational_velocity(), sample - bias, epsilon = 1e-12);
    }

    #[test]
    fn recenter_keeps_gravity_and_zeroes_the_heading_z() {
        let mut filter = default_filter();
        let orientation = geometry::eulers_to_quaternion(&Vector3::new(1.2, 2.5, 0.0));
        filter.set_orientation(&orientation);

        let gravity_before = filter.compute_gravity_estimate();
        filter.recenter();
        let gravity_after = filter.compute_gravity_estimate();

        assert!(
            (gravity_before - gravity_after).norm() <= 0.01,
            "gravity in the device frame deviated after recentering"
        );
        assert_relative_eq!(
            geometry::quaternion_to_rotation_matrix(&filter.orientation())[(2, 1)],
            0.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn invalid_timestamp_deltas_skip_propagation() {
        let mut filter = default_filter();
        filter.set_orientation(&Vector4::new(0.0, 0.0, 0.0, 1.0));

        let rate = Vector3::new(0.0, 0.0, 1.0);
        filter.add_gyro_measurement(&rate, 10.0); // delta from t=0 too large
        let q_before = filter.orientation();

        // Half a millisecond is below the minimum step.
        filter.add_gyro_measurement(&rate, 10.0005);
        assert_eq!(filter.orientation(), q_before);

        // Two seconds exceeds the maximum step.
        filter.add_gyro_measurement(&rate, 12.0005);
        assert_eq!(filter.orientation(), q_before);

        // A 10 ms step propagates.
        filter.add_gyro_measurement(&rate, 12.0105);
        assert_ne!(filter.orientation(), q_before);
    }

    #[test]
    fn first_accel_initializes_gravity_alignment() {
        let mut filter = default_filter();
        let down = Vector3::new(0.0, 0.0, -9.81);

        filter.add_accel_measurement(&down, 1.0);
        assert!(filter.is_orientation_set());

        let gravity = filter.compute_gravity_estimate();
        assert_relative_eq!(gravity, down.normalize(), epsilon = 1e-12);
    }

    #[test]
    fn gravity_estimate_stays_aligned_under_propagation() {
        let mut filter = default_filter();
        let down = Vector3::new(0.0, -9.81, 0.0);

        let mut t = 1.0;
        for _ in 0..500 {
            filter.add_accel_measurement(&down, t);
            filter.add_gyro_measurement(&Vector3::zeros(), t);
            t += 0.01;
        }

        let gravity = filter.compute_gravity_estimate();
        assert_relative_eq!(gravity, down.normalize(), epsilon = 1e-9);
    }

    #[test]
    fn large_gravity_error_after_pose_reset_is_corrected() {
        let mut filter = default_filter();
        let down = Vector3::new(0.0, 0.0, -9.81);

        let mut t = 1.0;
        for _ in 0..100 {
            filter.add_accel_measurement(&down, t);
            filter.add_gyro_measurement(&Vector3::zeros(), t);
            t += 0.01;
        }

        // Reset the pose to identity, which claims gravity along +z; the
        // next accel sample disagrees by 180 degrees and snaps it back.
        filter.set_orientation(&Vector4::new(0.0, 0.0, 0.0, 1.0));
        filter.add_accel_measurement(&down, t);

        let gravity = filter.compute_gravity_estimate();
        assert_relative_eq!(gravity, down.normalize(), epsilon = 1e-9);
    }

    #[test]
    fn callbacks_register_and_unregister() {
        let mut filter = default_filter();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let token = filter.register_on_bad_mag_calibration_detected_callback(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        filter.bad_magnetometer_calibration_detected_broadcast();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        filter.unregister_on_bad_mag_calibration_detected_callback(token);
        filter.bad_magnetometer_calibration_detected_broadcast();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gauss_newton_yaw_alignment_recovers_a_known_rotation() {
        let mut filter = default_filter();
        // Fill the buffer with projections of north rotated by a fixed yaw.
        let yaw: f64 = 0.7;
        let direction = Vector3::new(-yaw.sin(), yaw.cos(), 0.0);
        for slot in filter.projected_mag_measurement_vector.iter_mut() {
            *slot = direction;
        }

        let alignment = filter.compute_yaw_alignment_matrix().unwrap();
        let expected = Matrix3::new(
            yaw.cos(),
            -yaw.sin(),
            0.0,
            yaw.sin(),
            yaw.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        );
        assert_relative_eq!(alignment, expected, epsilon = 1e-4);
    }

    #[test]
    fn degenerate_mag_projections_fail_alignment() {
        let mut filter = default_filter();
        for slot in filter.projected_mag_measurement_vector.iter_mut() {
            *slot = Vector3::new(0.0, 0.0, 1.0); // no horizontal component
        }
        assert!(filter.compute_yaw_alignment_matrix().is_none());
    }
}
