//! Great-circle distance between two coordinates.

use geo_types::Point;

use crate::entities::Coordinates;
use crate::error::Error;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres. Both coordinates must be in range.
pub fn distance_km(a: Coordinates, b: Coordinates) -> Result<f64, Error> {
    a.validate()?;
    b.validate()?;

    Ok(haversine_km(a.into(), b.into()))
}

fn haversine_km(a: Point<f64>, b: Point<f64>) -> f64 {
    let (lat1, lng1) = (a.y().to_radians(), a.x().to_radians());
    let (lat2, lng2) = (b.y().to_radians(), b.x().to_radians());

    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlng = ((lng2 - lng1) * 0.5).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    // clamp guards against h drifting past 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    (EARTH_RADIUS_KM * c).max(0.0)
}

#[test]
fn identity_test() {
    let points = [
        Coordinates::new(6.9271, 79.8612),
        Coordinates::new(-33.8688, 151.2093),
        Coordinates::new(90.0, 0.0),
        Coordinates::new(0.0, -180.0),
    ];

    for point in points {
        assert_eq!(distance_km(point, point).unwrap(), 0.0);
    }
}

#[test]
fn symmetry_test() {
    let colombo = Coordinates::new(6.9271, 79.8612);
    let negombo = Coordinates::new(7.1806, 79.8846);
    let kandy = Coordinates::new(7.2906, 80.6337);

    for (a, b) in [(colombo, negombo), (colombo, kandy), (negombo, kandy)] {
        let ab = distance_km(a, b).unwrap();
        let ba = distance_km(b, a).unwrap();
        assert!((ab - ba).abs() < 1e-9);
        assert!(ab > 0.0);
    }
}

#[test]
fn colombo_to_negombo_test() {
    let distance = distance_km(
        Coordinates::new(6.9271, 79.8612),
        Coordinates::new(7.1806, 79.8846),
    )
    .unwrap();

    assert!((distance - 28.306).abs() < 0.01, "distance was {}", distance);
}

#[test]
fn antipodal_test() {
    let distance = distance_km(Coordinates::new(0.0, 0.0), Coordinates::new(0.0, 180.0)).unwrap();

    assert!((distance - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
}

#[test]
fn invalid_coordinate_test() {
    let err = distance_km(Coordinates::new(91.0, 0.0), Coordinates::new(0.0, 0.0)).unwrap_err();
    assert_eq!(err, crate::error::invalid_coordinate_error());

    let err = distance_km(Coordinates::new(0.0, 0.0), Coordinates::new(0.0, -181.0)).unwrap_err();
    assert_eq!(err, crate::error::invalid_coordinate_error());
}
