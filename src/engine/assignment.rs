//! Driver selection.
//!
//! Candidates are tried nearest first. Each try is a compare-and-set on the
//! driver and then on the car, so two bookings racing for the same driver
//! can never both win: the loser sees the reservation fail and moves on to
//! its next candidate.

use uuid::Uuid;

use crate::entities::{Booking, Vehicle};
use crate::error::Error;
use crate::pool::{DriverPool, VehicleCriteria};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssignmentResult {
    pub driver_id: Uuid,
    pub car_id: Uuid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Assigned(AssignmentResult),
    NoDriverAvailable,
}

/// Reserves the best available driver for `booking`, together with either
/// the driver's own car or the `requested` fleet car. Nothing in the pool is
/// left reserved when no driver can be found.
#[tracing::instrument(skip_all, fields(booking_id = %booking.id))]
pub async fn assign(
    pool: &DriverPool,
    booking: &Booking,
    requested: &Vehicle,
) -> Result<AssignmentOutcome, Error> {
    let criteria = VehicleCriteria::from(requested);
    let candidates = pool.find_eligible(booking.pickup_coords, &criteria).await?;

    for candidate in candidates.iter() {
        let driver_id = candidate.driver_id;

        if !pool.reserve(driver_id, booking.id).await {
            tracing::debug!(%driver_id, "lost the driver to another booking, moving on");
            continue;
        }

        let car_id = candidate.vehicle_id.unwrap_or(requested.id);

        if !pool.reserve_vehicle(car_id, driver_id).await {
            tracing::debug!(%driver_id, %car_id, "car is taken, releasing driver and moving on");
            pool.release(driver_id).await;
            continue;
        }

        tracing::info!(
            %driver_id,
            %car_id,
            distance_km = candidate.distance_km,
            "reserved driver"
        );

        return Ok(AssignmentOutcome::Assigned(AssignmentResult { driver_id, car_id }));
    }

    tracing::info!("no driver available among {} candidates", candidates.len());

    Ok(AssignmentOutcome::NoDriverAvailable)
}
