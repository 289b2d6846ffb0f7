//! Numeric integration of quaternion kinematics.
//!
//! The angular rate over a step is given as a paired 6-vector of the start
//! and end gyro samples and interpolated linearly inside the step. Euler is
//! the default used on the hot path; second- and fourth-order Runge-Kutta
//! variants are available.

use nalgebra::{SVector, Vector4};

use crate::geometry;

/// Paired start/end gyro samples over one integration step.
pub type GyroPair = SVector<f64, 6>;

#[derive(Clone, Copy, Debug, Default)]
pub struct QuaternionIntegrator;

impl QuaternionIntegrator {
    pub fn new() -> Self {
        QuaternionIntegrator
    }

    /// Integrates the state over `delta_t` between time-steps k and k+1, then
    /// renormalizes and canonicalizes the sign of the quaternion.
    pub fn integrate(
        &self,
        state: &Vector4<f64>,
        gyro_measurements: &GyroPair,
        delta_t: f64,
    ) -> Vector4<f64> {
        let mut next_state = self.euler_state_transition(state, gyro_measurements, delta_t);

        next_state.normalize_mut();
        if next_state[3] < 0.0 {
            next_state = -next_state;
        }
        next_state
    }

    pub fn euler_state_transition(
        &self,
        previous_state: &Vector4<f64>,
        gyro_measurements: &GyroPair,
        step_size: f64,
    ) -> Vector4<f64> {
        let k1 = self.state_time_derivative(0.0, step_size, previous_state, gyro_measurements);
        previous_state + k1
    }

    pub fn runge_kutta_second_order_state_transition(
        &self,
        previous_state: &Vector4<f64>,
        gyro_measurements: &GyroPair,
        step_size: f64,
    ) -> Vector4<f64> {
        let k1 = self.state_time_derivative(0.0, step_size, previous_state, gyro_measurements);
        // There is a family of second order methods; this uses alpha = 2/3.
        let k2 = self.state_time_derivative(
            2.0 / 3.0 * step_size,
            step_size,
            &(previous_state + 2.0 / 3.0 * k1),
            gyro_measurements,
        );
        previous_state + (k1 + 3.0 * k2) / 4.0
    }

    pub fn runge_kutta_fourth_order_state_transition(
        &self,
        previous_state: &Vector4<f64>,
        gyro_measurements: &GyroPair,
        step_size: f64,
    ) -> Vector4<f64> {
        let k1 = self.state_time_derivative(0.0, step_size, previous_state, gyro_measurements);
        let k2 = self.state_time_derivative(
            0.5 * step_size,
            step_size,
            &(previous_state + 0.5 * k1),
            gyro_measurements,
        );
        let k3 = self.state_time_derivative(
            0.5 * step_size,
            step_size,
            &(previous_state + 0.5 * k2),
            gyro_measurements,
        );
        let k4 = self.state_time_derivative(
            step_size,
            step_size,
            &(previous_state + k3),
            gyro_measurements,
        );

        previous_state + (k1 + 2.0 * k2 + 2.0 * k3 + k4) / 6.0
    }

    fn state_time_derivative(
        &self,
        t: f64,
        step_size: f64,
        state: &Vector4<f64>,
        gyro_measurements: &GyroPair,
    ) -> Vector4<f64> {
        let start_rate = gyro_measurements.fixed_rows::<3>(0).into_owned();
        let end_rate = gyro_measurements.fixed_rows::<3>(3).into_owned();
        let rate = start_rate + (end_rate - start_rate) * t / step_size;

        // The step-size scaling applies to every Runge-Kutta stage, so it is
        // folded in here instead of at each call site.
        0.5 * geometry::omega(&rate) * state * step_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn identity() -> Vector4<f64> {
        Vector4::new(0.0, 0.0, 0.0, 1.0)
    }

    fn constant_rate(rate: Vector3<f64>) -> GyroPair {
        let mut pair = GyroPair::zeros();
        pair.fixed_rows_mut::<3>(0).copy_from(&rate);
        pair.fixed_rows_mut::<3>(3).copy_from(&rate);
        pair
    }

    #[test]
    fn zero_rate_preserves_the_quaternion_for_all_methods() {
        let integrator = QuaternionIntegrator::new();
        let q = Vector4::new(0.2, -0.1, 0.3, 0.9).normalize();
        let zeros = GyroPair::zeros();

        assert_relative_eq!(
            integrator.euler_state_transition(&q, &zeros, 0.01),
            q,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            integrator.runge_kutta_second_order_state_transition(&q, &zeros, 0.01),
            q,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            integrator.runge_kutta_fourth_order_state_transition(&q, &zeros, 0.01),
            q,
            epsilon = 1e-15
        );
        assert_relative_eq!(integrator.integrate(&q, &zeros, 0.01), q, epsilon = 1e-15);
    }

    #[test]
    fn integrate_returns_a_canonical_unit_quaternion() {
        let integrator = QuaternionIntegrator::new();
        let pair = constant_rate(Vector3::new(0.5, -0.2, 0.1));
        let next = integrator.integrate(&identity(), &pair, 0.01);
        assert_relative_eq!(next.norm(), 1.0, epsilon = 1e-12);
        assert!(next[3] >= 0.0);
    }

    #[test]
    fn many_small_steps_accumulate_the_expected_rotation() {
        let integrator = QuaternionIntegrator::new();
        let rate = 0.5; // rad/s about z
        let pair = constant_rate(Vector3::new(0.0, 0.0, rate));

        let mut q = identity();
        let dt = 0.001;
        let steps = 2000; // 2 s -> 1 rad total
        for _ in 0..steps {
            q = integrator.integrate(&q, &pair, dt);
        }

        let axis_angle = crate::geometry::quaternion_to_axis_angle(&q);
        assert_relative_eq!(axis_angle.norm(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn rk4_tracks_a_varying_rate_better_than_euler() {
        let integrator = QuaternionIntegrator::new();
        let mut pair = GyroPair::zeros();
        pair.fixed_rows_mut::<3>(0)
            .copy_from(&Vector3::new(0.0, 0.0, 0.2));
        pair.fixed_rows_mut::<3>(3)
            .copy_from(&Vector3::new(0.0, 0.0, 0.8));

        // The mid-step average rate is 0.5 rad/s; over one 0.1 s step RK4
        // should land closer to a 0.05 rad rotation than Euler does.
        let reference = 0.05;
        let euler = integrator.euler_state_transition(&identity(), &pair, 0.1);
        let rk4 =
            integrator.runge_kutta_fourth_order_state_transition(&identity(), &pair, 0.1);

        let euler_angle = 2.0 * euler[2].atan2(euler[3]);
        let rk4_angle = 2.0 * rk4[2].atan2(rk4[3]);
        assert!((rk4_angle.abs() - reference).abs() <= (euler_angle.abs() - reference).abs());
    }
}
