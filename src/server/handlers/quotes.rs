use axum::extract::{Extension, Json};

use crate::api::DynAPI;
use crate::auth::User;
use crate::entities::{Quote, QuoteRequest};
use crate::error::Error;
use crate::server::handlers::Payload;

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Payload(request): Payload<QuoteRequest>,
) -> Result<Json<Quote>, Error> {
    let quote = api.quote_fare(user, request).await?;

    Ok(quote.into())
}
