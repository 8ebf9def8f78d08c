use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::error::{invalid_coordinate_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);

        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(invalid_coordinate_error())
        }
    }
}

impl From<Coordinates> for Point<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Point::new(coordinates.lng, coordinates.lat)
    }
}

impl From<Point<f64>> for Coordinates {
    fn from(point: Point<f64>) -> Self {
        Self {
            lat: point.y(),
            lng: point.x(),
        }
    }
}

#[test]
fn coordinates_validation_test() {
    assert!(Coordinates::new(6.9271, 79.8612).validate().is_ok());
    assert!(Coordinates::new(90.0, -180.0).validate().is_ok());
    assert!(Coordinates::new(90.1, 0.0).validate().is_err());
    assert!(Coordinates::new(0.0, 180.5).validate().is_err());
    assert!(Coordinates::new(f64::NAN, 0.0).validate().is_err());
}

#[test]
fn point_conversion_test() {
    let coordinates = Coordinates::new(7.1806, 79.8846);
    let point: Point<f64> = coordinates.into();

    assert_eq!(point.x(), 79.8846);
    assert_eq!(point.y(), 7.1806);
    assert_eq!(Coordinates::from(point), coordinates);
}
