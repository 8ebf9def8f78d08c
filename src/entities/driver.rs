use chrono::{DateTime, Duration, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, VehicleRegistration};
use crate::error::{invalid_state_error, validation_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, PolarClass)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    #[polar(attribute)]
    pub id: Uuid,
    pub name: String,
    pub contact: String,
    pub vehicle_id: Option<Uuid>,
    pub available: bool,
    pub active: bool,
    pub current_location: Option<Coordinates>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub active_booking_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRegistration {
    pub name: String,
    pub contact: String,
    /// Present when the driver brings their own car.
    #[serde(default)]
    pub vehicle: Option<VehicleRegistration>,
}

impl DriverRegistration {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(validation_error("driver name is required"));
        }

        if self.contact.trim().is_empty() {
            return Err(validation_error("driver contact is required"));
        }

        if let Some(vehicle) = &self.vehicle {
            vehicle.validate()?;
        }

        Ok(())
    }
}

/// Name and contact number, as a driver edits them on their profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    pub name: String,
    pub contact: String,
}

impl DriverProfile {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(validation_error("driver name is required"));
        }

        if self.contact.trim().is_empty() {
            return Err(validation_error("driver contact is required"));
        }

        Ok(())
    }
}

impl Driver {
    /// New drivers start off duty; they go available once they report a
    /// location and toggle availability.
    pub fn new(user_id: Uuid, name: String, contact: String, vehicle_id: Option<Uuid>) -> Self {
        Self {
            id: user_id,
            name,
            contact,
            vehicle_id,
            available: false,
            active: true,
            current_location: None,
            location_updated_at: None,
            active_booking_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn status_name(&self) -> String {
        match (self.active, self.active_booking_id, self.available) {
            (false, _, _) => "deactivated".into(),
            (true, Some(_), _) => "on_booking".into(),
            (true, None, true) => "available".into(),
            (true, None, false) => "off_duty".into(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.active && self.available && self.active_booking_id.is_none()
    }

    /// Whether the last reported location is recent enough to dispatch on.
    pub fn has_fresh_location(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match (self.current_location, self.location_updated_at) {
            (Some(_), Some(updated_at)) => now - updated_at <= ttl,
            _ => false,
        }
    }

    #[tracing::instrument]
    pub fn reserve(&mut self, booking_id: Uuid) -> Result<(), Error> {
        if !self.is_available() {
            return Err(invalid_state_error());
        }

        self.available = false;
        self.active_booking_id = Some(booking_id);

        Ok(())
    }

    /// Idempotent: releasing a driver without a booking changes nothing but
    /// availability.
    #[tracing::instrument]
    pub fn release(&mut self) {
        self.active_booking_id = None;
        self.available = self.active;
    }

    pub fn set_availability(&mut self, available: bool) -> Result<(), Error> {
        if self.active_booking_id.is_some() {
            return Err(invalid_state_error());
        }

        if available && !self.active {
            return Err(invalid_state_error());
        }

        self.available = available;

        Ok(())
    }

    pub fn update_location(&mut self, coordinates: Coordinates) -> Result<(), Error> {
        coordinates.validate()?;

        self.current_location = Some(coordinates);
        self.location_updated_at = Some(Utc::now());

        Ok(())
    }

    pub fn update_profile(&mut self, profile: DriverProfile) {
        self.name = profile.name.trim().to_string();
        self.contact = profile.contact.trim().to_string();
    }

    pub fn deactivate(&mut self) -> Result<(), Error> {
        if self.active_booking_id.is_some() {
            return Err(invalid_state_error());
        }

        self.active = false;
        self.available = false;

        Ok(())
    }
}

#[cfg(test)]
fn on_duty_driver() -> Driver {
    let mut driver = Driver::new(Uuid::new_v4(), "Nimal".into(), "0771234567".into(), None);
    driver
        .update_location(Coordinates::new(6.9271, 79.8612))
        .unwrap();
    driver.set_availability(true).unwrap();
    driver
}

#[test]
fn reserve_is_compare_and_set_test() {
    let mut driver = on_duty_driver();
    let booking_id = Uuid::new_v4();

    driver.reserve(booking_id).unwrap();
    assert!(!driver.available);
    assert_eq!(driver.active_booking_id, Some(booking_id));

    assert!(driver.reserve(Uuid::new_v4()).is_err());
    assert_eq!(driver.active_booking_id, Some(booking_id));
}

#[test]
fn release_is_idempotent_test() {
    let mut driver = on_duty_driver();
    driver.reserve(Uuid::new_v4()).unwrap();

    driver.release();
    assert!(driver.is_available());

    driver.release();
    assert!(driver.is_available());
    assert_eq!(driver.active_booking_id, None);
}

#[test]
fn availability_locked_during_booking_test() {
    let mut driver = on_duty_driver();
    driver.reserve(Uuid::new_v4()).unwrap();

    assert!(driver.set_availability(true).is_err());
    assert!(driver.set_availability(false).is_err());
    assert!(driver.deactivate().is_err());
}

#[test]
fn deactivated_driver_is_never_available_test() {
    let mut driver = on_duty_driver();
    driver.deactivate().unwrap();

    assert!(!driver.is_available());
    assert!(driver.set_availability(true).is_err());
    assert!(driver.reserve(Uuid::new_v4()).is_err());

    driver.release();
    assert!(!driver.available);
    assert_eq!(driver.status_name(), "deactivated");
}

#[test]
fn location_freshness_test() {
    let mut driver = Driver::new(Uuid::new_v4(), "Kamal".into(), "0711111111".into(), None);
    let now = Utc::now();

    assert!(!driver.has_fresh_location(Duration::seconds(60), now));

    driver
        .update_location(Coordinates::new(7.0, 80.0))
        .unwrap();
    assert!(driver.has_fresh_location(Duration::seconds(60), Utc::now()));
    assert!(!driver.has_fresh_location(Duration::seconds(60), Utc::now() + Duration::seconds(120)));

    assert!(driver.update_location(Coordinates::new(100.0, 0.0)).is_err());
}
