mod assignment;
mod booking_api;
mod driver_api;
mod helpers;
mod quote_api;
pub mod sweeper;
mod vehicle_api;

#[cfg(test)]
mod testing;

pub use assignment::{assign, AssignmentOutcome, AssignmentResult};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use oso::Oso;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    api::API,
    auth::authorizor,
    config::AssignmentMode,
    db::Store,
    entities::Booking,
    error::{unauthorized_error, Error},
    external::notifier::Notifier,
    fare::FarePolicy,
    pool::{DriverPool, PoolSettings},
};

#[derive(Clone, Debug)]
pub struct Settings {
    pub fare: FarePolicy,
    pub refund_rate: Decimal,
    pub pending_timeout: Duration,
    pub assignment_mode: AssignmentMode,
    pub pool: PoolSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fare: FarePolicy::default(),
            refund_rate: Decimal::new(10, 2),
            pending_timeout: Duration::seconds(30),
            assignment_mode: AssignmentMode::Sync,
            pool: PoolSettings::default(),
        }
    }
}

type BookingBook = RwLock<HashMap<Uuid, Arc<Mutex<Booking>>>>;

/// Owns the booking book and the driver pool. Cloning is cheap and every
/// clone shares the same state, so background work gets its own handle.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    pool: Arc<DriverPool>,
    bookings: Arc<BookingBook>,
    authorizor: Oso,
    notifier: Arc<dyn Notifier>,
    settings: Settings,
}

impl Engine {
    /// Loads every persisted record into memory. The in-memory copy is
    /// authoritative from here on; the store is written through on each
    /// transition.
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub async fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        settings: Settings,
    ) -> Result<Self, Error> {
        let snapshot = store.load().await?;
        let pool = DriverPool::new(settings.pool);

        for vehicle in snapshot.vehicles {
            pool.register_vehicle(vehicle).await?;
        }

        for driver in snapshot.drivers {
            pool.register_driver(driver).await?;
        }

        let bookings: HashMap<Uuid, Arc<Mutex<Booking>>> = snapshot
            .bookings
            .into_iter()
            .map(|booking| (booking.id, Arc::new(Mutex::new(booking))))
            .collect();

        tracing::info!("loaded {} bookings", bookings.len());

        Ok(Self {
            store,
            pool: Arc::new(pool),
            bookings: Arc::new(RwLock::new(bookings)),
            authorizor: authorizor::new()?,
            notifier,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool(&self) -> &DriverPool {
        &self.pool
    }
}

impl Engine {
    pub fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        if self.authorizor.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(unauthorized_error())
    }
}

impl API for Engine {}
