use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::entities::{Coordinates, Driver, DriverProfile, DriverRegistration};
use crate::error::Error;
use crate::server::handlers::Payload;

#[derive(Serialize, Deserialize)]
pub struct AvailabilityParams {
    availability: bool,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Payload(registration): Payload<DriverRegistration>,
) -> Result<(StatusCode, Json<Driver>), Error> {
    let driver = api.register_driver(user, registration).await?;

    Ok((StatusCode::CREATED, driver.into()))
}

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<Vec<Driver>>, Error> {
    let drivers = api.list_drivers(user).await?;

    Ok(drivers.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, Error> {
    let driver = api.find_driver(user, id).await?;

    Ok(driver.into())
}

pub async fn update_availability(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Payload(params): Payload<AvailabilityParams>,
) -> Result<Json<Driver>, Error> {
    let driver = api
        .set_driver_availability(user, id, params.availability)
        .await?;

    Ok(driver.into())
}

pub async fn update_location(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Payload(coordinates): Payload<Coordinates>,
) -> Result<Json<Driver>, Error> {
    let driver = api.update_driver_location(user, id, coordinates).await?;

    Ok(driver.into())
}

pub async fn update_profile(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Payload(profile): Payload<DriverProfile>,
) -> Result<Json<Driver>, Error> {
    let driver = api.update_driver_profile(user, id, profile).await?;

    Ok(driver.into())
}

pub async fn deactivate(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, Error> {
    let driver = api.deactivate_driver(user, id).await?;

    Ok(driver.into())
}
