//! 2D/3D geometry helpers for the impact envelope.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Normalize an angle to (-PI, PI].
pub fn norm_angle_rad(mut a: f64) -> f64 {
    while a > std::f64::consts::PI {
        a -= std::f64::consts::PI * 2.0;
    }
    while a < -std::f64::consts::PI {
        a += std::f64::consts::PI * 2.0;
    }
    a
}

/// Axis-aligned 3D bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    pub fn of_points<'a, I>(points: I) -> Option<Aabb>
    where
        I: IntoIterator<Item = &'a Vector3<f64>>,
    {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut any = false;
        for p in points {
            any = true;
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        if any {
            Some(Aabb { min, max })
        } else {
            None
        }
    }

    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Convex hull of a 2D point set by Andrew's monotone chain.
///
/// Returns hull vertices in counter-clockwise order without repeating the
/// first vertex; collinear points on hull edges are dropped. Non-finite
/// input points are discarded. Inputs with fewer than 3 distinct points
/// come back as-is (sorted).
pub fn convex_hull_2d(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut pts: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|p| p[0].is_finite() && p[1].is_finite())
        .collect();
    if pts.len() <= 1 {
        return pts;
    }
    pts.sort_by(|a, b| {
        a[0].partial_cmp(&b[0])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a[1].partial_cmp(&b[1]).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut lower: Vec<[f64; 2]> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<[f64; 2]> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Signed-area magnitude of a simple polygon (shoelace formula).
pub fn polygon_area_2d(poly: &[[f64; 2]]) -> f64 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut a = 0.0;
    for i in 0..poly.len() {
        let p = poly[i];
        let q = poly[(i + 1) % poly.len()];
        a += p[0] * q[1] - q[0] * p[1];
    }
    a.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hull_of_square() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let hull = convex_hull_2d(&pts);
        assert_eq!(hull.len(), 4);
        // CCW: shoelace sum positive
        let mut signed = 0.0;
        for i in 0..hull.len() {
            let p = hull[i];
            let q = hull[(i + 1) % hull.len()];
            signed += p[0] * q[1] - q[0] * p[1];
        }
        assert!(signed > 0.0, "hull must be counter-clockwise");
        // no duplicates
        for i in 0..hull.len() {
            for j in (i + 1)..hull.len() {
                assert_ne!(hull[i], hull[j]);
            }
        }
        assert!((polygon_area_2d(&hull) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hull_drops_interior_and_collinear() {
        let pts = [
            [0.0, 0.0],
            [2.0, 0.0],
            [2.0, 2.0],
            [0.0, 2.0],
            [1.0, 1.0], // interior
            [1.0, 0.0], // collinear on bottom edge
        ];
        let hull = convex_hull_2d(&pts);
        assert_eq!(hull.len(), 4);
        assert!((polygon_area_2d(&hull) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_hull_filters_non_finite() {
        let pts = [[0.0, 0.0], [f64::NAN, 1.0], [1.0, 0.0], [0.5, f64::INFINITY]];
        let hull = convex_hull_2d(&pts);
        assert_eq!(hull.len(), 2);
    }

    #[test]
    fn test_norm_angle() {
        assert!((norm_angle_rad(3.0 * std::f64::consts::PI) - std::f64::consts::PI).abs() < 1e-12);
        assert!((norm_angle_rad(-3.0 * std::f64::consts::PI) - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(norm_angle_rad(0.5), 0.5);
    }

    #[test]
    fn test_aabb() {
        let pts = vec![
            Vector3::new(0.0, -1.0, 2.0),
            Vector3::new(3.0, 1.0, 0.0),
        ];
        let bb = Aabb::of_points(pts.iter()).unwrap();
        assert_eq!(bb.min, [0.0, -1.0, 0.0]);
        assert_eq!(bb.max, [3.0, 1.0, 2.0]);
        assert_eq!(bb.extent(), [3.0, 2.0, 2.0]);
        assert!(Aabb::of_points(std::iter::empty::<&Vector3<f64>>()).is_none());
    }
}
