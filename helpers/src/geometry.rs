//! Plane geometry used by the simulator, on top of `glam::DVec2`. Coordinates are screen pixels,
//! i.e. the y axis points down.

use glam::DVec2;
use std::f64::consts::{PI, TAU};

/// side returns the cross product (b - a) x (p - a). Its sign tells on which side of the line
/// through a and b the point p lies, zero means collinear.
pub fn side(a: DVec2, b: DVec2, p: DVec2) -> f64 {
    (b - a).perp_dot(p - a)
}

/// segments_cross checks if the motion segment p1 -> p2 strictly crosses the static segment
/// q1 - q2. Both endpoint pairs have to change sign with respect to the other segment, touching
/// or collinear configurations do not count. The result does not depend on the order of q1 and
/// q2.
pub fn segments_cross(p1: DVec2, p2: DVec2, q1: DVec2, q2: DVec2) -> bool {
    let d_q1 = side(p1, p2, q1);
    let d_q2 = side(p1, p2, q2);

    if d_q1 * d_q2 >= 0.0 {
        return false;
    }

    let d_p1 = side(q1, q2, p1);
    let d_p2 = side(q1, q2, p2);

    d_p1 * d_p2 < 0.0
}

/// distance_to_segment returns the shortest distance between p and the segment a - b.
pub fn distance_to_segment(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.length_squared();

    if len_sq == 0.0 {
        return p.distance(a);
    }

    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// normalize_angle maps an angle into ]-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec2,
    pub max: DVec2,
}

impl Aabb {
    pub fn from_points(points: &[DVec2]) -> Aabb {
        let init = Aabb {
            min: DVec2::splat(f64::INFINITY),
            max: DVec2::splat(f64::NEG_INFINITY),
        };

        points.iter().fold(init, |aabb, p| Aabb {
            min: aabb.min.min(*p),
            max: aabb.max.max(*p),
        })
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmplt(other.max).all() && other.min.cmplt(self.max).all()
    }

    pub fn size(&self) -> DVec2 {
        self.max - self.min
    }
}
