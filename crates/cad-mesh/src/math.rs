/// Cartesian point / direction in millimetres.
pub type Point3 = [f64; 3];

/// 2D point used by shape outlines and lathe profiles.
pub type Point2 = [f64; 2];

#[inline]
pub fn add(a: Point3, b: Point3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn mul_scalar(v: Point3, scalar: f64) -> Point3 {
    [v[0] * scalar, v[1] * scalar, v[2] * scalar]
}

#[inline]
pub fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn length(v: Point3) -> f64 {
    dot(v, v).sqrt()
}

#[inline]
pub fn normalize(v: Point3) -> Point3 {
    let len = length(v);
    if len <= f64::EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

#[inline]
pub fn lerp(a: Point3, b: Point3, t: f64) -> Point3 {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Unit normal of a counter-clockwise triangle; zero for degenerate input.
#[inline]
pub fn triangle_normal(a: Point3, b: Point3, c: Point3) -> Point3 {
    normalize(cross(sub(b, a), sub(c, a)))
}

#[inline]
pub fn triangle_area(a: Point3, b: Point3, c: Point3) -> f64 {
    0.5 * length(cross(sub(b, a), sub(c, a)))
}

#[inline]
pub fn rotate_x(p: Point3, angle: f64) -> Point3 {
    let (s, c) = angle.sin_cos();
    [p[0], p[1] * c - p[2] * s, p[1] * s + p[2] * c]
}

#[inline]
pub fn rotate_y(p: Point3, angle: f64) -> Point3 {
    let (s, c) = angle.sin_cos();
    [p[0] * c + p[2] * s, p[1], -p[0] * s + p[2] * c]
}

#[inline]
pub fn rotate_z(p: Point3, angle: f64) -> Point3 {
    let (s, c) = angle.sin_cos();
    [p[0] * c - p[1] * s, p[0] * s + p[1] * c, p[2]]
}

/// Applies an intrinsic `XYZ` Euler rotation, i.e. the matrix `Rx * Ry * Rz`.
#[inline]
pub fn rotate_euler_xyz(p: Point3, euler: Point3) -> Point3 {
    rotate_x(rotate_y(rotate_z(p, euler[2]), euler[1]), euler[0])
}

pub fn is_finite(p: Point3) -> bool {
    p.iter().all(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::{cross, normalize, rotate_euler_xyz, rotate_z, triangle_normal};

    fn assert_close(a: [f64; 3], b: [f64; 3]) {
        for axis in 0..3 {
            assert!((a[axis] - b[axis]).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn cross_follows_right_hand_rule() {
        assert_close(cross([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn degenerate_vectors_normalize_to_zero() {
        assert_close(normalize([0.0, 0.0, 0.0]), [0.0, 0.0, 0.0]);
        assert_close(
            triangle_normal([0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]),
            [0.0, 0.0, 0.0],
        );
    }

    #[test]
    fn euler_rotation_applies_z_before_x() {
        let rotated = rotate_euler_xyz([1.0, 0.0, 0.0], [FRAC_PI_2, 0.0, FRAC_PI_2]);
        // z turns +x into +y, then x turns +y into +z.
        assert_close(rotated, [0.0, 0.0, 1.0]);
        assert_close(rotate_z([1.0, 0.0, 0.0], FRAC_PI_2), [0.0, 1.0, 0.0]);
    }
}
