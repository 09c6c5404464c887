use serde::{Deserialize, Serialize};

/// A point in the widget's (latitude, longitude) convention.
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

    /// Both axes must be present; `0.0` counts as present.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(Self::new(latitude, longitude)),
            _ => None,
        }
    }
}

/// Longitude-first point as used by the map engine and the geocoding API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lon: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl From<LngLat> for Coordinate {
    fn from(point: LngLat) -> Self {
        Self {
            latitude: point.lat,
            longitude: point.lon,
        }
    }
}

impl From<Coordinate> for LngLat {
    fn from(coordinate: Coordinate) -> Self {
        Self {
            lon: coordinate.longitude,
            lat: coordinate.latitude,
        }
    }
}

/// Location-related props pushed by the host record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationProps {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geo_address: Option<String>,
}

impl LocationProps {
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.latitude, self.longitude)
    }
}

/// Address fields of a property record that make up the geocoding hint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressParts {
    pub city: Option<String>,
    pub district: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
}

impl AddressParts {
    pub fn to_geo_address(&self) -> Option<String> {
        let parts = [
            self.city.as_deref(),
            self.district.as_deref(),
            self.street.as_deref(),
            self.house_number.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
