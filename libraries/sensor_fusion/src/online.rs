//! Outer facade for fusing gyroscope and accelerometer readings into a
//! device orientation.
//!
//! Example streaming usage, with events arriving in timestamp order:
//!
//! ```
//! use nalgebra::Vector3;
//! use sensor_fusion::online::{FusionOptions, OnlineSensorFusion};
//!
//! let mut filter = OnlineSensorFusion::new(FusionOptions::default());
//! filter.add_accel_measurement(&Vector3::new(0.0, 0.0, -9.81), 0.01);
//! filter.add_gyro_measurement(&Vector3::zeros(), 0.01);
//! let orientation = filter.orientation();
//! ```
//!
//! Recommended capture logic: call [`OnlineSensorFusion::recenter`] right
//! before each video capture so every video starts with the same heading,
//! and feed uncalibrated gyro data with a one-shot
//! [`OnlineSensorFusion::set_gyro_bias`] before the capture begins.
//!
//! The methods must be called from one logical timeline; the type holds no
//! internal lock.

use nalgebra::{Matrix3, Rotation3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry;
use crate::orientation_filter::{OrientationFilter, OrientationFilterConfig};

/// Tuning knobs of the fusion facade; see [`OrientationFilterConfig`] for the
/// full filter surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusionOptions {
    /// Controls the bias estimation feedback. A high value decreases the time
    /// to adapt to gyroscope bias but can result in a tilting horizon.
    pub gyroscope_bias_correction_gain: f64,
    /// Controls the yaw correction feedback for the accelerometer.
    pub accel_yaw_correction_gain: f64,
    /// Controls the stationary bias correction feedback.
    pub stationary_bias_correction_gain: f64,
    /// Rotation between the device frame and the IMU frame, calibrated in the
    /// factory or approximated from the CAD design. Typically close to a 0 or
    /// 90 degree rotation around the z-axis.
    pub device_to_imu_transform: Matrix3<f64>,
}

impl Default for FusionOptions {
    fn default() -> Self {
        FusionOptions {
            gyroscope_bias_correction_gain: 0.1,
            accel_yaw_correction_gain: 1.0,
            stationary_bias_correction_gain: 0.1,
            device_to_imu_transform: Matrix3::identity(),
        }
    }
}

/// Maps the IMU frame (+z up) into the world frame (+y down).
fn gravity_adjust_matrix() -> Matrix3<f64> {
    Matrix3::new(
        1.0, 0.0, 0.0, //
        0.0, 0.0, -1.0, //
        0.0, 1.0, 0.0,
    )
}

fn filter_configuration(options: &FusionOptions) -> OrientationFilterConfig {
    OrientationFilterConfig {
        stationary_bias_correction_gain: options.stationary_bias_correction_gain,
        gyroscope_bias_correction_gain: options.gyroscope_bias_correction_gain,
        accel_yaw_correction_gain: options.accel_yaw_correction_gain,
        ..OrientationFilterConfig::default()
    }
}

pub struct OnlineSensorFusion {
    orientation_filter: OrientationFilter,
    calibrated_imu_orientation: Matrix3<f64>,
    last_timestamp_s: f64,
}

impl OnlineSensorFusion {
    pub fn new(options: FusionOptions) -> Self {
        OnlineSensorFusion {
            orientation_filter: OrientationFilter::new(filter_configuration(&options)),
            calibrated_imu_orientation: options.device_to_imu_transform,
            last_timestamp_s: 0.0,
        }
    }

    /// Adds a gyroscope measurement in rad/s; timestamps should be
    /// monotonically increasing.
    pub fn add_gyro_measurement(&mut self, sample: &Vector3<f64>, timestamp_s: f64) {
        if timestamp_s < self.last_timestamp_s {
            warn!("gyro timestamps not monotonically increasing");
        }
        self.orientation_filter
            .add_gyro_measurement(sample, timestamp_s);
        self.last_timestamp_s = timestamp_s;
    }

    /// Adds an accelerometer measurement in m/s^2; timestamps should be
    /// monotonically increasing.
    pub fn add_accel_measurement(&mut self, sample: &Vector3<f64>, timestamp_s: f64) {
        if timestamp_s < self.last_timestamp_s {
            warn!("accel timestamps not monotonically increasing");
        }
        self.orientation_filter
            .add_accel_measurement(sample, timestamp_s);
        self.last_timestamp_s = timestamp_s;
    }

    /// Returns the sensor-fused device orientation in global coordinates as
    /// an angle-axis vector: the gravity transform and the fused orientation
    /// applied to the device-to-IMU transform.
    pub fn orientation(&self) -> Vector3<f32> {
        let q = self.orientation_filter.orientation();
        // The JPL coefficients read as a Hamilton quaternion give the
        // sensor-to-world rotation.
        let orientation = geometry::quaternion_to_rotation_matrix(&q).transpose();
        let matrix = gravity_adjust_matrix() * orientation * self.calibrated_imu_orientation;

        let rotation = Rotation3::from_matrix_unchecked(matrix);
        match rotation.axis_angle() {
            Some((axis, angle)) => (axis.into_inner() * angle).map(|v| v as f32),
            None => Vector3::zeros(),
        }
    }

    /// Sets the gyro bias used by the orientation filter. Intended right
    /// before a continuous capture, not during one.
    pub fn set_gyro_bias(&mut self, bias: &Vector3<f64>) {
        self.orientation_filter.set_gyro_bias(bias);
    }

    /// Resets the yaw of the orientation filter while keeping gravity.
    pub fn recenter(&mut self) {
        let q = self.orientation_filter.orientation();
        let m = geometry::quaternion_to_rotation_matrix(&q).transpose();

        let mut adjust = Matrix3::identity();
        adjust.set_row(1, &m.column(2).transpose());
        let row0 = adjust.row(1).transpose().cross(&adjust.row(2).transpose());
        if row0.norm_squared() < f64::EPSILON {
            return;
        }
        adjust.set_row(0, &row0.normalize().transpose());
        let row1 = adjust.row(2).transpose().cross(&adjust.row(0).transpose());
        adjust.set_row(1, &row1.normalize().transpose());

        // Hamilton matrix-to-quaternion of (adjust * m), expressed through
        // the JPL converter on the transpose.
        let recentered = geometry::rotation_matrix_to_quaternion(&(adjust * m).transpose());
        self.orientation_filter.set_orientation(&recentered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    const EPSILON: f64 = 1e-6;
    const GRAVITY: f64 = 9.81;

    fn down_world() -> Vector3<f64> {
        Vector3::new(0.0, 1.0, 0.0)
    }

    fn rotation_matrix(orientation: Vector3<f32>) -> Matrix3<f64> {
        let aa = orientation.map(|v| v as f64);
        if aa.norm() < 1e-12 {
            return Matrix3::identity();
        }
        *Rotation3::from_axis_angle(&nalgebra::Unit::new_normalize(aa), aa.norm()).matrix()
    }

    fn euler_angles(coeff: &Matrix3<f64>) -> Vector3<f64> {
        let mut result = Vector3::zeros();
        result[0] = coeff[(0, 2)].atan2(coeff[(2, 2)]);
        let c2 = Vector2::new(coeff[(1, 1)], coeff[(1, 0)]).norm();
        result[1] = (-coeff[(1, 2)]).atan2(c2);
        let s1 = result[0].sin();
        let c1 = result[0].cos();
        result[2] = (s1 * coeff[(2, 1)] - c1 * coeff[(0, 1)])
            .atan2(c1 * coeff[(0, 0)] - s1 * coeff[(2, 0)]);
        result
    }

    fn init(gravity: Vector3<f64>) -> OnlineSensorFusion {
        let mut filter = OnlineSensorFusion::new(FusionOptions::default());
        for i in 0..2 {
            filter.add_accel_measurement(&gravity, i as f64);
            filter.add_gyro_measurement(&Vector3::zeros(), i as f64);
        }
        filter
    }

    #[test]
    fn static_orientation_maps_device_z_down() {
        let filter = init(Vector3::new(0.0, 0.0, -GRAVITY));
        let orientation = rotation_matrix(filter.orientation());
        let down = orientation * Vector3::z();
        assert_relative_eq!(down, down_world(), epsilon = EPSILON);
    }

    #[test]
    fn static_portrait_orientation_maps_device_y_down() {
        let filter = init(Vector3::new(0.0, -GRAVITY, 0.0));
        let orientation = rotation_matrix(filter.orientation());
        let down = orientation * Vector3::y();
        assert_relative_eq!(down, down_world(), epsilon = EPSILON);
    }

    #[test]
    fn static_landscape_orientation_maps_device_x_down() {
        let filter = init(Vector3::new(-GRAVITY, 0.0, 0.0));
        let orientation = rotation_matrix(filter.orientation());
        let down = orientation * Vector3::x();
        assert_relative_eq!(down, down_world(), epsilon = EPSILON);
    }

    #[test]
    fn recenter_zeroes_yaw_and_keeps_pitch_and_roll() {
        let mut filter = init(Vector3::new(0.0, -GRAVITY, 0.0));

        // Rotate roughly PI/4 about each axis in turn.
        for i in (1..=200).rev() {
            let t = 1.0 + 1.0 / i as f64;
            filter.add_accel_measurement(&Vector3::new(0.0, -GRAVITY, 0.0), t);
            filter.add_gyro_measurement(
                &Vector3::new(0.0, std::f64::consts::FRAC_PI_4, 0.0),
                t,
            );
        }
        for i in (1..=200).rev() {
            let t = 2.0 + 1.0 / i as f64;
            filter.add_accel_measurement(
                &Vector3::new(0.0, -GRAVITY / 2.0, -GRAVITY / 2.0),
                t,
            );
            filter.add_gyro_measurement(
                &Vector3::new(std::f64::consts::FRAC_PI_4, 0.0, 0.0),
                t,
            );
        }
        for i in (1..=200).rev() {
            let t = 3.0 + 1.0 / i as f64;
            filter.add_accel_measurement(
                &Vector3::new(-GRAVITY / 3.0, -GRAVITY / 3.0, -GRAVITY / 3.0),
                t,
            );
            filter.add_gyro_measurement(
                &Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_4),
                t,
            );
        }

        let angles = euler_angles(&rotation_matrix(filter.orientation()));
        for i in 0..3 {
            assert!(angles[i].abs() > EPSILON, "expected rotation about axis {i}");
        }

        filter.recenter();
        let recentered_angles = euler_angles(&rotation_matrix(filter.orientation()));
        // Yaw is gone; pitch and roll are unchanged.
        assert_relative_eq!(recentered_angles[0], 0.0, epsilon = EPSILON);
        assert_relative_eq!(recentered_angles[1], angles[1], epsilon = EPSILON);
        assert_relative_eq!(recentered_angles[2], angles[2], epsilon = EPSILON);
    }
}
