//! Great-circle math and coordinate noise on a spherical earth.

use rand::Rng;
use rand_distr::StandardNormal;

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Flat-earth approximation used for small offsets and noise.
pub const METERS_PER_DEGREE_LAT: f64 = 111_000.0;

/// Great-circle distance in meters (Haversine formula).
#[must_use]
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from point 1 to point 2, degrees in [0, 360).
#[must_use]
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lon.cos();

    normalize_heading(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` along `bearing_deg` from a start.
#[must_use]
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    if distance_m == 0.0 {
        return (lat, lon);
    }

    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();
    let theta = bearing_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;

    let sin_phi2 = phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
    let phi2 = sin_phi2.clamp(-1.0, 1.0).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * sin_phi2);

    normalize_position(phi2.to_degrees(), lambda2.to_degrees())
}

/// Whether two points lie within `max_range_m` of each other.
#[must_use]
pub fn is_within_range(lat1: f64, lon1: f64, lat2: f64, lon2: f64, max_range_m: f64) -> bool {
    distance_m(lat1, lon1, lat2, lon2) <= max_range_m
}

/// Displace a coordinate by local north/east offsets in meters.
#[must_use]
pub fn offset_by_meters(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let d_lat = north_m / METERS_PER_DEGREE_LAT;
    let d_lon = east_m / meters_per_degree_lon(lat);
    normalize_position(lat + d_lat, lon + d_lon)
}

/// Add zero-mean Gaussian noise with `sigma_m` standard deviation in meters.
pub fn add_noise<R: Rng + ?Sized>(rng: &mut R, lat: f64, lon: f64, sigma_m: f64) -> (f64, f64) {
    let north: f64 = rng.sample(StandardNormal);
    let east: f64 = rng.sample(StandardNormal);
    offset_by_meters(lat, lon, north * sigma_m, east * sigma_m)
}

/// Clamp latitude to [-90, 90] and wrap longitude into [-180, 180].
#[must_use]
pub fn normalize_position(lat: f64, lon: f64) -> (f64, f64) {
    let lat = lat.clamp(-90.0, 90.0);
    let lon = if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    };
    (lat, lon)
}

/// Wrap any heading into [0, 360).
#[must_use]
pub fn normalize_heading(heading_deg: f64) -> f64 {
    let h = heading_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if h >= 360.0 { 0.0 } else { h }
}

fn meters_per_degree_lon(lat: f64) -> f64 {
    // Guard the poles where a degree of longitude collapses to zero length
    (METERS_PER_DEGREE_LAT * lat.to_radians().cos()).max(1.0)
}
