pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers between two WGS84 points given as
/// `(latitude, longitude)` decimal degrees.
pub fn haversine_km(origin: (f64, f64), destination: (f64, f64)) -> f64 {
    let (lat1, lon1) = origin;
    let (lat2, lon2) = destination;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Rounds a coordinate to 6 decimal places (~0.1 m), the precision used
/// for route cache keys.
pub fn round_coord(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Coordinate in integer microdegrees. Hashable, exact, and equal for any
/// two floats that round to the same 6-decimal value.
pub fn microdegrees(value: f64) -> i64 {
    (value * 1e6).round() as i64
}
