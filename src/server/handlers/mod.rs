pub mod bookings;
pub mod drivers;
pub mod quotes;
pub mod vehicles;

use async_trait::async_trait;
use axum::body::HttpBody;
use axum::extract::{FromRequest, Json, RequestParts};
use axum::BoxError;
use serde::de::DeserializeOwned;

use crate::error::{validation_error, Error};

/// JSON request body. Unlike `Json`, a missing, malformed or mistyped body is
/// a validation error with the usual error body.
#[derive(Debug)]
pub struct Payload<T>(pub T);

#[async_trait]
impl<T, B> FromRequest<B> for Payload<T>
where
    T: DeserializeOwned,
    B: HttpBody + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req).await.map_err(|rejection| {
            tracing::debug!("rejected request body: {}", rejection);
            validation_error(rejection.to_string())
        })?;

        Ok(Self(value))
    }
}
