use super::Engine;

use async_trait::async_trait;

use crate::{
    api::QuoteAPI,
    auth::{Platform, User},
    entities::{Quote, QuoteRequest},
    error::{not_found_error, Error},
    geo,
};

#[async_trait]
impl QuoteAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn quote_fare(&self, user: User, request: QuoteRequest) -> Result<Quote, Error> {
        self.authorize(user.clone(), "quote_fare", Platform::default())?;

        request.validate()?;

        let vehicle = self
            .pool
            .vehicle(&request.car_id)
            .await
            .ok_or_else(not_found_error)?;

        let distance_km = geo::distance_km(request.pickup_coords, request.drop_coords)?;
        let fare = self
            .settings
            .fare
            .quote(&vehicle, distance_km, request.driver_required)?;

        Ok(Quote {
            car_id: vehicle.id,
            distance_km,
            fare,
        })
    }
}
