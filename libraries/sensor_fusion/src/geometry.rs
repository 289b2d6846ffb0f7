//! Small SO(3)/SO(4) kernels over nalgebra types.
//!
//! Quaternions follow the JPL convention throughout: the coefficient vector
//! is ordered (x, y, z, w) with the scalar last, and composition reads as a
//! passive rotation. The formulas are derived using the conventions of:
//!
//! [1] N. Trawny and S. I. Roumeliotis. Indirect Kalman Filter for 3D
//!     Attitude Estimation. University of Minnesota, Dept. of Comp. Sci. &
//!     Eng., Tech. Rep. 2005-002, March 2005.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// Omega matrix used in the computation of the quaternion time derivative.
pub fn omega(w: &Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new(
        0.0, w[2], -w[1], w[0], //
        -w[2], 0.0, w[0], w[1], //
        w[1], -w[0], 0.0, w[2], //
        -w[0], -w[1], -w[2], 0.0,
    )
}

/// Skew-symmetric (cross-product) matrix.
pub fn skew_symmetric(x: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -x[2], x[1], //
        x[2], 0.0, -x[0], //
        -x[1], x[0], 0.0,
    )
}

/// Quaternion inverse; for a unit quaternion this is the conjugate.
pub fn quaternion_inverse(q: &Vector4<f64>) -> Vector4<f64> {
    Vector4::new(-q[0], -q[1], -q[2], q[3])
}

/// Conversion from quaternion to rotation matrix.
pub fn quaternion_to_rotation_matrix(q: &Vector4<f64>) -> Matrix3<f64> {
    let mut r = Matrix3::zeros();
    r[(0, 0)] = q[0] * q[0] - q[1] * q[1] - q[2] * q[2] + q[3] * q[3];
    r[(0, 1)] = 2.0 * (q[0] * q[1] + q[2] * q[3]);
    r[(0, 2)] = 2.0 * (q[0] * q[2] - q[1] * q[3]);

    r[(1, 0)] = 2.0 * (q[0] * q[1] - q[2] * q[3]);
    r[(1, 1)] = -q[0] * q[0] + q[1] * q[1] - q[2] * q[2] + q[3] * q[3];
    r[(1, 2)] = 2.0 * (q[1] * q[2] + q[0] * q[3]);

    r[(2, 0)] = 2.0 * (q[0] * q[2] + q[1] * q[3]);
    r[(2, 1)] = 2.0 * (q[1] * q[2] - q[0] * q[3]);
    r[(2, 2)] = -q[0] * q[0] - q[1] * q[1] + q[2] * q[2] + q[3] * q[3];
    r
}

/// Computes the product q1 * q2, normalized and with the scalar component
/// kept non-negative.
pub fn quaternion_multiplication(q1: &Vector4<f64>, q2: &Vector4<f64>) -> Vector4<f64> {
    let qv = q1.fixed_rows::<3>(0).into_owned();
    let mut l = Matrix4::zeros();
    l.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(Matrix3::identity() * q1[3] - skew_symmetric(&qv)));
    l.fixed_view_mut::<1, 3>(3, 0).copy_from(&(-qv.transpose()));
    l.fixed_view_mut::<4, 1>(0, 3).copy_from(q1);

    let mut result: Vector4<f64> = l * q2;
    result /= result.norm();
    if result[3] < 0.0 {
        result = -result;
    }
    result
}

/// Conversion from rotation matrix to JPL quaternion, branching on the
/// largest diagonal component for numerical stability.
pub fn rotation_matrix_to_quaternion(mat: &Matrix3<f64>) -> Vector4<f64> {
    let d0 = mat[(0, 0)];
    let d1 = mat[(1, 1)];
    let d2 = mat[(2, 2)];
    let ww = 1.0 + d0 + d1 + d2;
    let xx = 1.0 + d0 - d1 - d2;
    let yy = 1.0 - d0 + d1 - d2;
    let zz = 1.0 - d0 - d1 + d2;

    let max = ww.max(xx).max(yy).max(zz);
    if ww == max {
        let w4 = (ww * 4.0).sqrt();
        return Vector4::new(
            -(mat[(2, 1)] - mat[(1, 2)]) / w4,
            -(mat[(0, 2)] - mat[(2, 0)]) / w4,
            -(mat[(1, 0)] - mat[(0, 1)]) / w4,
            w4 / 4.0,
        );
    }

    if xx == max {
        let x4 = (xx * 4.0).sqrt();
        return Vector4::new(
            -x4 / 4.0,
            -(mat[(0, 1)] + mat[(1, 0)]) / x4,
            -(mat[(0, 2)] + mat[(2, 0)]) / x4,
            (mat[(2, 1)] - mat[(1, 2)]) / x4,
        );
    }

    if yy == max {
        let y4 = (yy * 4.0).sqrt();
        return Vector4::new(
            -(mat[(0, 1)] + mat[(1, 0)]) / y4,
            -y4 / 4.0,
            -(mat[(1, 2)] + mat[(2, 1)]) / y4,
            (mat[(0, 2)] - mat[(2, 0)]) / y4,
        );
    }

    let z4 = (zz * 4.0).sqrt();
    Vector4::new(
        -(mat[(0, 2)] + mat[(2, 0)]) / z4,
        -(mat[(1, 2)] + mat[(2, 1)]) / z4,
        -z4 / 4.0,
        (mat[(1, 0)] - mat[(0, 1)]) / z4,
    )
}

/// Builds the quaternion rotating `from` into `to` via the half-angle
/// construction; antiparallel inputs rotate about an arbitrary orthogonal
/// axis.
pub fn rotate_into(from: &Vector3<f64>, to: &Vector3<f64>) -> Vector4<f64> {
    const EPSILON: f64 = 1e-13;

    let norm_u_norm_v = from.norm() * to.norm();
    let mut real_part = norm_u_norm_v + from.dot(to);

    let mut w;
    if real_part < EPSILON * norm_u_norm_v {
        // The inputs are exactly opposite; any orthogonal axis works and the
        // quaternion normalization below takes care of the axis length.
        real_part = 0.0;
        w = if from[0].abs() > from[2].abs() {
            Vector3::new(-from[1], from[0], 0.0)
        } else {
            Vector3::new(0.0, -from[2], from[1])
        };
    } else {
        w = from.cross(to);
    }

    // Convert to JPL.
    w = -w;

    Vector4::new(w[0], w[1], w[2], real_part).normalize()
}

/// Axis-angle rotation of a unit quaternion. Not numerically stable near the
/// identity; intended for tests and debugging.
pub fn quaternion_to_axis_angle(quat: &Vector4<f64>) -> Vector3<f64> {
    if 1.0 - quat[3].abs() < 1e-15 {
        return Vector3::zeros();
    }

    // Convert from JPL to Hamilton.
    let quat_inv = quaternion_inverse(quat);
    let angle = 2.0 * quat_inv[3].acos();
    let s = 1.0 / (1.0 - quat_inv[3] * quat_inv[3]).sqrt();

    angle * s * quat_inv.fixed_rows::<3>(0).into_owned()
}

/// Builds a quaternion from yaw/pitch/roll Euler angles.
pub fn eulers_to_quaternion(eulers: &Vector3<f64>) -> Vector4<f64> {
    let c1 = eulers[0].cos();
    let s1 = eulers[0].sin();
    let c2 = eulers[1].cos();
    let s2 = eulers[1].sin();
    let c3 = eulers[2].cos();
    let s3 = eulers[2].sin();

    let mut quat = Vector4::zeros();
    quat[3] = (1.0 + c1 * c2 + c1 * c3 - s1 * s2 * s3 + c2 * c3).sqrt() * 0.5;
    let w4 = 0.25 / quat[3];

    quat[2] = (c2 * s3 + c1 * s3 + s1 * s2 * c3) * w4;
    quat[1] = (s1 * c2 + s1 * c3 + c1 * s2 * s3) * w4;
    quat[0] = (-s1 * s3 + c1 * s2 * c3 + s2) * w4;

    quat
}
