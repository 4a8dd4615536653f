//! Great-circle distance on a spherical Earth.

/// Mean Earth radius used by the haversine formula, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two WGS84 points given in degrees.
///
/// ```
/// use taxi_daynight::geo::haversine_km;
///
/// let d = haversine_km(13.75, 100.50, 13.76, 100.50);
/// assert!((d - 1.112).abs() < 0.01);
/// ```
#[inline]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_km(13.75, 100.50, 13.75, 100.50), 0.0);
    }

    #[test]
    fn test_one_hundredth_degree_of_latitude() {
        let d = haversine_km(13.75, 100.50, 13.76, 100.50);
        assert!((d - 1.11).abs() / 1.11 < 0.01, "got {d}");
    }

    #[test]
    fn test_symmetric() {
        let there = haversine_km(13.7563, 100.5018, 13.6900, 100.7501);
        let back = haversine_km(13.6900, 100.7501, 13.7563, 100.5018);
        assert!((there - back).abs() < 1e-9);
        // Grand Palace to Suvarnabhumi, roughly 28 km as the crow flies
        assert!(there > 25.0 && there < 31.0, "got {there}");
    }
}
