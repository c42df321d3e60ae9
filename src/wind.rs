//! Wind handling for pellet integration.

use nalgebra::Vector3;

/// Uniform wind vector from speed and blow-to bearing.
///
/// Bearing follows the scene azimuth convention: 0° blows toward +Y,
/// 90° toward +X. The field is treated as horizontally uniform; pellet
/// flight is short enough that shear is noise next to pattern dispersion.
pub fn wind_vector(speed: f64, bearing_deg: f64) -> Vector3<f64> {
    let th = bearing_deg.to_radians();
    Vector3::new(th.sin() * speed, th.cos() * speed, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wind_bearing_convention() {
        let north = wind_vector(5.0, 0.0);
        assert!((north.x).abs() < 1e-12);
        assert!((north.y - 5.0).abs() < 1e-12);

        let east = wind_vector(5.0, 90.0);
        assert!((east.x - 5.0).abs() < 1e-12);
        assert!(east.y.abs() < 1e-12);

        assert_eq!(wind_vector(0.0, 123.0), Vector3::zeros());
    }
}
