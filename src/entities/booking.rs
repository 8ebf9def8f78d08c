use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;
use crate::error::{invalid_rate_error, invalid_state_error, validation_error, Error};
use crate::fare::{round_money, FareBreakdown};

pub const NO_DRIVER_MESSAGE: &str =
    "No driver is available for your booking right now. You can retry the assignment later.";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, PolarClass)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[polar(attribute)]
    pub id: Uuid,
    #[polar(attribute)]
    pub customer_id: Uuid,
    pub requested_car_id: Uuid,
    pub car_id: Option<Uuid>,
    #[polar(attribute)]
    pub driver_id: Option<Uuid>,
    pub pickup_location: String,
    pub destination: String,
    pub pickup_coords: Coordinates,
    pub drop_coords: Coordinates,
    pub scheduled_pickup_at: DateTime<Utc>,
    pub driver_required: bool,
    pub distance_km: f64,
    pub fare: FareBreakdown,
    pub status: Status,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub driver_assignment_message: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Unassigned,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "PENDING".into(),
            Self::Unassigned => "UNASSIGNED".into(),
            Self::Confirmed => "CONFIRMED".into(),
            Self::InProgress => "IN_PROGRESS".into(),
            Self::Completed => "COMPLETED".into(),
            Self::Cancelled => "CANCELLED".into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A booking request after it has been parsed at the boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct BookingRequest {
    pub customer_id: Uuid,
    pub car_id: Uuid,
    pub pickup_location: String,
    pub destination: String,
    pub pickup_coords: Coordinates,
    pub drop_coords: Coordinates,
    pub scheduled_pickup_at: DateTime<Utc>,
    pub driver_required: bool,
}

impl BookingRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), Error> {
        self.pickup_coords.validate()?;
        self.drop_coords.validate()?;

        if self.pickup_location.trim().is_empty() {
            return Err(validation_error("pickup location is required"));
        }

        if self.destination.trim().is_empty() {
            return Err(validation_error("destination is required"));
        }

        if self.scheduled_pickup_at < now {
            return Err(validation_error("pickup time must not be in the past"));
        }

        Ok(())
    }
}

/// Driver and vehicle freed by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Released {
    pub driver_id: Uuid,
    pub car_id: Option<Uuid>,
}

impl Booking {
    pub fn new(request: BookingRequest, distance_km: f64, fare: FareBreakdown) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            requested_car_id: request.car_id,
            car_id: None,
            driver_id: None,
            pickup_location: request.pickup_location,
            destination: request.destination,
            pickup_coords: request.pickup_coords,
            drop_coords: request.drop_coords,
            scheduled_pickup_at: request.scheduled_pickup_at,
            driver_required: request.driver_required,
            distance_km,
            fare,
            status: Status::Pending,
            cancellation_reason: None,
            refund_amount: None,
            driver_assignment_message: None,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn assign(&mut self, driver_id: Uuid, car_id: Uuid, message: String) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Confirmed;
                self.driver_id = Some(driver_id);
                self.car_id = Some(car_id);
                self.driver_assignment_message = Some(message);
                self.touch();
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn mark_unassigned(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Unassigned;
                self.driver_assignment_message = Some(NO_DRIVER_MESSAGE.into());
                self.touch();
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    pub fn reopen(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Unassigned => {
                self.status = Status::Pending;
                self.driver_assignment_message = None;
                self.touch();
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    pub fn accept(&mut self) -> Result<(), Error> {
        match (self.status, self.accepted_at) {
            (Status::Confirmed, None) => {
                self.accepted_at = Some(Utc::now());
                self.touch();
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    pub fn start(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Confirmed => {
                self.status = Status::InProgress;
                self.touch();
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    /// Completes the trip. The driver and car stay on the record; the caller
    /// returns them to the pool.
    pub fn complete(&mut self) -> Result<Released, Error> {
        match (self.status, self.driver_id) {
            (Status::InProgress, Some(driver_id)) => {
                self.status = Status::Completed;
                self.touch();
                Ok(Released {
                    driver_id,
                    car_id: self.car_id,
                })
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn cancel(&mut self, reason: &str, refund_rate: Decimal) -> Result<Option<Released>, Error> {
        if reason.trim().is_empty() {
            return Err(validation_error("cancellation reason is required"));
        }

        match self.status {
            Status::Pending | Status::Confirmed => {
                let refund = self
                    .fare
                    .total
                    .checked_mul(refund_rate)
                    .ok_or_else(invalid_rate_error)?;

                let released = self.driver_id.map(|driver_id| Released {
                    driver_id,
                    car_id: self.car_id,
                });

                self.status = Status::Cancelled;
                self.cancellation_reason = Some(reason.trim().to_string());
                self.refund_amount = Some(round_money(refund));
                self.driver_id = None;
                self.car_id = None;
                self.touch();

                Ok(released)
            }
            _ => Err(invalid_state_error()),
        }
    }
}

#[cfg(test)]
pub fn sample_request(customer_id: Uuid, car_id: Uuid) -> BookingRequest {
    BookingRequest {
        customer_id,
        car_id,
        pickup_location: "Colombo Fort".into(),
        destination: "Negombo".into(),
        pickup_coords: Coordinates::new(6.9271, 79.8612),
        drop_coords: Coordinates::new(7.1806, 79.8846),
        scheduled_pickup_at: Utc::now() + chrono::Duration::hours(1),
        driver_required: true,
    }
}
