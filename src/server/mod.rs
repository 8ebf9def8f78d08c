mod handlers;

use std::net::SocketAddr;

use axum::{
    extract::Extension,
    routing::{get, post, put},
    Router,
};

use crate::api::DynAPI;
use crate::error::{unexpected_error, Error};
use crate::server::handlers::{bookings, drivers, quotes, vehicles};

pub fn app(api: DynAPI) -> Router {
    Router::new()
        .route("/bookings", post(bookings::create).get(bookings::list))
        .route("/bookings/:id", get(bookings::find))
        .route("/bookings/:id/assign", post(bookings::assign))
        .route("/bookings/:id/accept", put(bookings::accept))
        .route("/bookings/:id/start", put(bookings::start))
        .route("/bookings/:id/complete", put(bookings::complete))
        .route("/bookings/:id/cancel", post(bookings::cancel))
        .route("/quotes", post(quotes::create))
        .route("/drivers", post(drivers::create).get(drivers::list))
        .route("/drivers/:id", get(drivers::find).put(drivers::update_profile))
        .route("/driver/:id/availability", put(drivers::update_availability))
        .route("/drivers/:id/availability", put(drivers::update_availability))
        .route("/drivers/:id/location", put(drivers::update_location))
        .route("/drivers/:id/deactivate", post(drivers::deactivate))
        .route("/vehicles", post(vehicles::create).get(vehicles::list))
        .route("/vehicles/:id", get(vehicles::find))
        .layer(Extension(api))
}

pub async fn serve(api: DynAPI, addr: SocketAddr) -> Result<(), Error> {
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app(api).into_make_service())
        .await
        .map_err(|err| {
            tracing::error!("server error: {}", err);
            unexpected_error()
        })
}
