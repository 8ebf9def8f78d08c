use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;
use crate::error::Error;
use crate::fare::FareBreakdown;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub car_id: Uuid,
    pub pickup_coords: Coordinates,
    pub drop_coords: Coordinates,
    #[serde(default = "default_driver_required")]
    pub driver_required: bool,
}

fn default_driver_required() -> bool {
    true
}

impl QuoteRequest {
    pub fn validate(&self) -> Result<(), Error> {
        self.pickup_coords.validate()?;
        self.drop_coords.validate()
    }
}

/// Fare preview for a trip that has not been booked yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub car_id: Uuid,
    pub distance_km: f64,
    pub fare: FareBreakdown,
}
