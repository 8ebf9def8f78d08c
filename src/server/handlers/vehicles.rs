use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::entities::{Vehicle, VehicleRegistration};
use crate::error::Error;
use crate::server::handlers::Payload;

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Payload(registration): Payload<VehicleRegistration>,
) -> Result<(StatusCode, Json<Vehicle>), Error> {
    let vehicle = api.register_vehicle(user, registration).await?;

    Ok((StatusCode::CREATED, vehicle.into()))
}

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<Vec<Vehicle>>, Error> {
    let vehicles = api.list_vehicles(user).await?;

    Ok(vehicles.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Vehicle>, Error> {
    let vehicle = api.find_vehicle(user, id).await?;

    Ok(vehicle.into())
}
