use serde::{Deserialize, Serialize};

/// Mean earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DEFAULT_GEOHASH_PRECISION: usize = 10;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self::new(latitude, longitude)
    }
}

/// Haversine distance between two points, in kilometres.
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Encodes a coordinate as a base-32 geohash of `precision` characters.
///
/// Bits alternate longitude/latitude starting with longitude, five bits per
/// output character.
pub fn geohash_for_location(coord: &Coordinate, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut chunk = 0usize;
    let mut bits = 0u8;
    let mut even = true;

    while hash.len() < precision {
        let (range, value) = if even {
            (&mut lng_range, coord.longitude)
        } else {
            (&mut lat_range, coord.latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        if value >= mid {
            chunk = (chunk << 1) | 1;
            range.0 = mid;
        } else {
            chunk <<= 1;
            range.1 = mid;
        }

        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(GEOHASH_ALPHABET[chunk] as char);
            chunk = 0;
            bits = 0;
        }
    }

    hash
}

/// Shifts a coordinate due north by `km`. Handy for placing reports at a
/// known distance from a user.
#[cfg(test)]
pub fn offset_north(coord: &Coordinate, km: f64) -> Coordinate {
    let delta = (km / EARTH_RADIUS_KM).to_degrees();
    Coordinate::new(coord.latitude + delta, coord.longitude)
}
