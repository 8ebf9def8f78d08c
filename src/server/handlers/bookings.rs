use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::entities::{Booking, BookingRequest, Coordinates};
use crate::error::{validation_error, Error};
use crate::server::handlers::Payload;

/// Booking form as the front-end submits it. The fare fields are what the
/// client displayed; the server recomputes the fare and only logs a mismatch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    customer_id: Option<Uuid>,
    car_id: Uuid,
    pickup_date: String,
    pickup_time: String,
    pickup_location: String,
    destination: String,
    pickup_coords: Coordinates,
    drop_coords: Coordinates,
    #[serde(default = "default_driver_required")]
    driver_required: bool,
    distance: Option<f64>,
    total_amount: Option<Decimal>,
}

fn default_driver_required() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    reason: String,
}

fn parse_pickup_at(date: &str, time: &str) -> Result<DateTime<Utc>, Error> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| validation_error("pickupDate must be YYYY-MM-DD"))?;

    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M"))
        .map_err(|_| validation_error("pickupTime must be HH:MM"))?;

    Ok(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

impl CreateParams {
    fn into_request(self, user: &User) -> Result<BookingRequest, Error> {
        Ok(BookingRequest {
            customer_id: self.customer_id.unwrap_or(user.id),
            car_id: self.car_id,
            scheduled_pickup_at: parse_pickup_at(&self.pickup_date, &self.pickup_time)?,
            pickup_location: self.pickup_location,
            destination: self.destination,
            pickup_coords: self.pickup_coords,
            drop_coords: self.drop_coords,
            driver_required: self.driver_required,
        })
    }
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Payload(params): Payload<CreateParams>,
) -> Result<(StatusCode, Json<Booking>), Error> {
    let client_total = params.total_amount;
    let client_distance = params.distance;

    let request = params.into_request(&user)?;
    let booking = api.create_booking(user, request).await?;

    if let Some(total) = client_total {
        if total != booking.fare.total {
            tracing::warn!(
                booking_id = %booking.id,
                client = %total,
                server = %booking.fare.total,
                "client fare differs from computed fare"
            );
        }
    }

    if let Some(distance) = client_distance {
        tracing::debug!(client = distance, server = booking.distance_km, "booking distance");
    }

    Ok((StatusCode::CREATED, booking.into()))
}

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<Vec<Booking>>, Error> {
    let bookings = api.list_bookings(user).await?;

    Ok(bookings.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    let booking = api.find_booking(user, id).await?;

    Ok(booking.into())
}

pub async fn assign(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    let booking = api.assign_driver(user, id).await?;

    Ok(booking.into())
}

pub async fn accept(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    let booking = api.accept_booking(user, id).await?;

    Ok(booking.into())
}

pub async fn start(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    let booking = api.start_booking(user, id).await?;

    Ok(booking.into())
}

pub async fn complete(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, Error> {
    let booking = api.complete_booking(user, id).await?;

    Ok(booking.into())
}

pub async fn cancel(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Payload(params): Payload<CancelParams>,
) -> Result<Json<Booking>, Error> {
    let booking = api.cancel_booking(user, id, params.reason).await?;

    Ok(booking.into())
}

#[test]
fn parse_pickup_at_test() {
    use chrono::{Datelike, Timelike};

    let at = parse_pickup_at("2030-03-14", "09:45").unwrap();
    assert_eq!((at.year(), at.month(), at.day()), (2030, 3, 14));
    assert_eq!((at.hour(), at.minute(), at.second()), (9, 45, 0));

    assert!(parse_pickup_at("2030-03-14", "09:45:30").is_ok());
    assert!(parse_pickup_at("14/03/2030", "09:45").unwrap_err().is_validation_error());
    assert!(parse_pickup_at("2030-03-14", "late").is_err());
}
