use serde::{Deserialize, Serialize};

use crate::error::{invalid_argument, FeedResult};

/// An immutable latitude/longitude pair attached to a post.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> FeedResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(invalid_argument(
                "Latitude must be between -90 and 90 degrees.",
            ));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid_argument(
                "Longitude must be between -180 and 180 degrees.",
            ));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}
