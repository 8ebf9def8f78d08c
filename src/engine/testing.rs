use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Engine, Settings};

use crate::{
    auth::User,
    db::{ChangeSet, MemoryStore, Snapshot, Store},
    entities::{sample_registration, sample_request, BookingRequest, Coordinates, Driver, Vehicle},
    error::{database_error, Error},
    external::notifier::{Notification, Notifier},
};

pub const COLOMBO: Coordinates = Coordinates {
    lat: 6.9271,
    lng: 79.8612,
};

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), Error> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

/// Memory store whose commits can be made to fail, either all of them or
/// those touching given bookings.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    failing_bookings: Mutex<HashSet<Uuid>>,
}

impl FlakyStore {
    pub fn fail_commits(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn fail_booking(&self, id: Uuid) {
        self.failing_bookings.lock().await.insert(id);
    }

    pub async fn recover(&self) {
        self.fail_commits(false);
        self.failing_bookings.lock().await.clear();
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn load(&self) -> Result<Snapshot, Error> {
        self.inner.load().await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), Error> {
        let poisoned = {
            let failing_bookings = self.failing_bookings.lock().await;
            changes
                .bookings
                .iter()
                .any(|booking| failing_bookings.contains(&booking.id))
        };

        if poisoned || self.failing.load(Ordering::SeqCst) {
            return Err(database_error("connection reset"));
        }

        self.inner.commit(changes).await
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: User,
    pub system: User,
}

impl Harness {
    pub async fn new(settings: Settings) -> Self {
        Self::with_store(Arc::new(FlakyStore::default()), settings).await
    }

    pub async fn with_store(store: Arc<FlakyStore>, settings: Settings) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());

        let engine = Engine::new(
            store.clone() as Arc<dyn Store>,
            notifier.clone() as Arc<dyn Notifier>,
            settings,
        )
        .await
        .unwrap();

        Self {
            engine,
            store,
            notifier,
            admin: User::new(Uuid::new_v4(), &["admin"]),
            system: User::new_system_user(),
        }
    }

    pub async fn fleet_car(&self) -> Vehicle {
        let vehicle = Vehicle::new(sample_registration(), None);
        self.engine
            .pool
            .register_vehicle(vehicle.clone())
            .await
            .unwrap();
        vehicle
    }

    /// Registers an available driver with a fresh location and returns them
    /// as a user.
    pub async fn on_duty_driver(&self, at: Coordinates) -> User {
        let user = User::new(Uuid::new_v4(), &["driver"]);

        let mut driver = Driver::new(user.id, "Nimal".into(), "0771234567".into(), None);
        driver.update_location(at).unwrap();
        driver.set_availability(true).unwrap();
        self.engine.pool.register_driver(driver).await.unwrap();

        user
    }

    pub fn customer(&self) -> User {
        User::new(Uuid::new_v4(), &["customer"])
    }

    pub fn request(&self, customer: &User, car: &Vehicle) -> BookingRequest {
        sample_request(customer.id, car.id)
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.notifier.sent.lock().await.clone()
    }
}
