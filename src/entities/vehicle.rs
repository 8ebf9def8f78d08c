use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_rate_error, invalid_state_error, validation_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Uuid,
    pub brand: String,
    pub model: String,
    pub license_plate: String,
    pub capacity: u32,
    pub base_rate: Decimal,
    pub driver_rate: Decimal,
    pub category_id: String,
    pub available: bool,
    pub assigned_driver_id: Option<Uuid>,
    pub owner_driver_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRegistration {
    pub brand: String,
    pub model: String,
    pub license_plate: String,
    pub capacity: u32,
    pub base_rate: Decimal,
    pub driver_rate: Decimal,
    pub category_id: String,
}

impl VehicleRegistration {
    pub fn validate(&self) -> Result<(), Error> {
        if self.license_plate.trim().is_empty() {
            return Err(validation_error("license plate is required"));
        }

        if self.category_id.trim().is_empty() {
            return Err(validation_error("category is required"));
        }

        if self.capacity == 0 {
            return Err(validation_error("capacity must be at least 1"));
        }

        if self.base_rate.is_sign_negative() || self.driver_rate.is_sign_negative() {
            return Err(invalid_rate_error());
        }

        Ok(())
    }
}

impl Vehicle {
    pub fn new(registration: VehicleRegistration, owner_driver_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            brand: registration.brand,
            model: registration.model,
            license_plate: registration.license_plate,
            capacity: registration.capacity,
            base_rate: registration.base_rate,
            driver_rate: registration.driver_rate,
            category_id: registration.category_id,
            available: true,
            assigned_driver_id: None,
            owner_driver_id,
        }
    }

    pub fn status_name(&self) -> String {
        match self.available {
            true => "available".into(),
            false => "assigned".into(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available && self.assigned_driver_id.is_none()
    }

    pub fn reserve(&mut self, driver_id: Uuid) -> Result<(), Error> {
        if !self.is_available() {
            return Err(invalid_state_error());
        }

        if let Some(owner) = self.owner_driver_id {
            if owner != driver_id {
                return Err(invalid_state_error());
            }
        }

        self.available = false;
        self.assigned_driver_id = Some(driver_id);

        Ok(())
    }

    pub fn release(&mut self) {
        self.available = true;
        self.assigned_driver_id = None;
    }
}

#[cfg(test)]
pub fn sample_registration() -> VehicleRegistration {
    VehicleRegistration {
        brand: "Toyota".into(),
        model: "Prius".into(),
        license_plate: "CAB-1234".into(),
        capacity: 4,
        base_rate: Decimal::new(1500, 0),
        driver_rate: Decimal::new(750, 0),
        category_id: "sedan".into(),
    }
}

#[test]
fn reserve_and_release_test() {
    let mut vehicle = Vehicle::new(sample_registration(), None);
    let driver_id = Uuid::new_v4();

    vehicle.reserve(driver_id).unwrap();
    assert!(!vehicle.is_available());
    assert_eq!(vehicle.assigned_driver_id, Some(driver_id));
    assert!(vehicle.reserve(Uuid::new_v4()).is_err());

    vehicle.release();
    vehicle.release();
    assert!(vehicle.is_available());
    assert_eq!(vehicle.assigned_driver_id, None);
}

#[test]
fn owned_vehicle_only_reserved_by_owner_test() {
    let owner = Uuid::new_v4();
    let mut vehicle = Vehicle::new(sample_registration(), Some(owner));

    assert!(vehicle.reserve(Uuid::new_v4()).is_err());
    assert!(vehicle.is_available());

    vehicle.reserve(owner).unwrap();
    assert!(!vehicle.is_available());
}

#[test]
fn registration_validation_test() {
    assert!(sample_registration().validate().is_ok());

    let mut registration = sample_registration();
    registration.capacity = 0;
    assert!(registration.validate().is_err());

    let mut registration = sample_registration();
    registration.base_rate = Decimal::new(-1, 0);
    assert_eq!(registration.validate().unwrap_err(), invalid_rate_error());
}
