use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Latitude / longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn distance_miles(&self, other: &GeoPoint) -> f64 {
        haversine_miles(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Radius restriction around an origin point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFilter {
    pub origin: GeoPoint,
    pub radius_miles: f64,
}

impl GeoFilter {
    pub fn new(lat: f64, lon: f64, radius_miles: f64) -> Self {
        Self {
            origin: GeoPoint::new(lat, lon),
            radius_miles,
        }
    }
}

/// Great-circle distance in miles between two coordinates
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards against a > 1.0 from rounding on antipodal points
    2.0 * EARTH_RADIUS_MILES * a.sqrt().min(1.0).asin()
}
