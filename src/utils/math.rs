//! Additional math helpers layered on top of `glam`.

use glam::{Quat, Vec3, Vec4};

/// Builds a plane equation `(n, d)` with `n·x + d = 0` through `point`.
pub fn plane_from_point_normal(point: Vec3, normal: Vec3) -> Vec4 {
    let n = normal.normalize_or_zero();
    n.extend(-n.dot(point))
}

/// Re-expresses a plane under a rigid transform `x' = rotation * x + translation`.
pub fn transform_plane(plane: Vec4, rotation: Quat, translation: Vec3) -> Vec4 {
    let normal = rotation * plane.truncate();
    normal.extend(plane.w - normal.dot(translation))
}

/// Signed distance of `point` to `plane`.
#[inline]
pub fn plane_distance(plane: Vec4, point: Vec3) -> f32 {
    plane.truncate().dot(point) + plane.w
}

/// Squared distance between segments `[p0, p1]` and `[q0, q1]`.
pub fn segment_segment_distance_squared(p0: Vec3, p1: Vec3, q0: Vec3, q1: Vec3) -> f32 {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t) = if a <= f32::EPSILON && e <= f32::EPSILON {
        (0.0, 0.0)
    } else if a <= f32::EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= f32::EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > f32::EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    ((p0 + d1 * s) - (q0 + d2 * t)).length_squared()
}

/// Bit mask with the `count` bits starting at `first` set.
pub fn bit_range_mask(first: u32, count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    let high = if count >= 32 { u32::MAX } else { (1u32 << count) - 1 };
    high << first
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transformed_plane_keeps_points_on_surface() {
        let plane = plane_from_point_normal(Vec3::new(0.0, 2.0, 0.0), Vec3::Y);
        let rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let translation = Vec3::new(1.0, 0.0, 3.0);
        let moved = transform_plane(plane, rotation, translation);
        let point = rotation * Vec3::new(5.0, 2.0, -1.0) + translation;
        assert_relative_eq!(plane_distance(moved, point), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn parallel_segments_report_gap() {
        let d = segment_segment_distance_squared(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(1.0, 2.0, 0.0),
        );
        assert_relative_eq!(d, 4.0, epsilon = 1e-5);
    }

    #[test]
    fn bit_range_masks() {
        assert_eq!(bit_range_mask(2, 3), 0b11100);
        assert_eq!(bit_range_mask(0, 32), u32::MAX);
        assert_eq!(bit_range_mask(4, 0), 0);
    }
}
