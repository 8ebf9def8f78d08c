use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::{postgres::PgPoolOptions, types::Json, Acquire, Executor, Pool, Postgres, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::{Booking, Driver, Vehicle};
use crate::error::Error;

/// Everything the engine needs to rebuild its in-memory state.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub bookings: Vec<Booking>,
    pub drivers: Vec<Driver>,
    pub vehicles: Vec<Vehicle>,
}

/// Records touched by one transition, written together.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub bookings: Vec<Booking>,
    pub drivers: Vec<Driver>,
    pub vehicles: Vec<Vehicle>,
}

impl ChangeSet {
    pub fn booking(mut self, booking: Booking) -> Self {
        self.bookings.push(booking);
        self
    }

    pub fn driver(mut self, driver: Option<Driver>) -> Self {
        self.drivers.extend(driver);
        self
    }

    pub fn vehicle(mut self, vehicle: Option<Vehicle>) -> Self {
        self.vehicles.extend(vehicle);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty() && self.drivers.is_empty() && self.vehicles.is_empty()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self) -> Result<Snapshot, Error>;

    async fn commit(&self, changes: ChangeSet) -> Result<(), Error>;
}

pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip(db_uri))]
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        // TODO: move this to migrations
        pool.execute("CREATE TABLE IF NOT EXISTS vehicles (id UUID PRIMARY KEY, status VARCHAR NOT NULL, data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS drivers (id UUID PRIMARY KEY, status VARCHAR NOT NULL, data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS bookings (id UUID PRIMARY KEY, status VARCHAR NOT NULL, customer_id UUID NOT NULL, data JSONB NOT NULL)")
            .await?;

        Ok(Self { pool })
    }

    async fn fetch_all<T: DeserializeOwned + Send + Unpin + 'static>(
        &self,
        table: &str,
    ) -> Result<Vec<T>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(sqlx::query(&format!("SELECT data FROM {}", table)))
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let Json(record): Json<T> = row.try_get("data")?;
            records.push(record);
        }

        Ok(records)
    }
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self))]
    async fn load(&self) -> Result<Snapshot, Error> {
        Ok(Snapshot {
            bookings: self.fetch_all("bookings").await?,
            drivers: self.fetch_all("drivers").await?,
            vehicles: self.fetch_all("vehicles").await?,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn commit(&self, changes: ChangeSet) -> Result<(), Error> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        for vehicle in changes.vehicles.iter() {
            tx.execute(
                sqlx::query("INSERT INTO vehicles (id, status, data) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data")
                    .bind(&vehicle.id)
                    .bind(vehicle.status_name())
                    .bind(Json(vehicle)),
            )
            .await?;
        }

        for driver in changes.drivers.iter() {
            tx.execute(
                sqlx::query("INSERT INTO drivers (id, status, data) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data")
                    .bind(&driver.id)
                    .bind(driver.status_name())
                    .bind(Json(driver)),
            )
            .await?;
        }

        for booking in changes.bookings.iter() {
            tx.execute(
                sqlx::query("INSERT INTO bookings (id, status, customer_id, data) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data")
                    .bind(&booking.id)
                    .bind(booking.status.name())
                    .bind(&booking.customer_id)
                    .bind(Json(booking)),
            )
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}

/// Keeps records in process memory. Used when no database is configured and
/// in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
    drivers: Mutex<HashMap<Uuid, Driver>>,
    vehicles: Mutex<HashMap<Uuid, Vehicle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert<T>(map: &mut HashMap<Uuid, T>, records: Vec<T>, id: impl Fn(&T) -> Uuid) {
    for record in records {
        map.insert(id(&record), record);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self) -> Result<Snapshot, Error> {
        Ok(Snapshot {
            bookings: self.bookings.lock().await.values().cloned().collect(),
            drivers: self.drivers.lock().await.values().cloned().collect(),
            vehicles: self.vehicles.lock().await.values().cloned().collect(),
        })
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), Error> {
        let mut bookings = self.bookings.lock().await;
        let mut drivers = self.drivers.lock().await;
        let mut vehicles = self.vehicles.lock().await;

        upsert(&mut bookings, changes.bookings, |b| b.id);
        upsert(&mut drivers, changes.drivers, |d| d.id);
        upsert(&mut vehicles, changes.vehicles, |v| v.id);

        Ok(())
    }
}

#[test]
fn memory_store_upserts_test() {
    use crate::entities::{sample_registration, sample_request};
    use crate::fare::FarePolicy;
    use tokio_test::block_on;

    let store = MemoryStore::new();
    let vehicle = Vehicle::new(sample_registration(), None);
    let fare = FarePolicy::default().quote(&vehicle, 10.0, true).unwrap();
    let mut booking = Booking::new(sample_request(Uuid::new_v4(), vehicle.id), 10.0, fare);

    block_on(store.commit(
        ChangeSet::default()
            .booking(booking.clone())
            .vehicle(Some(vehicle.clone())),
    ))
    .unwrap();

    booking.mark_unassigned().unwrap();
    block_on(store.commit(ChangeSet::default().booking(booking.clone()))).unwrap();

    let snapshot = block_on(store.load()).unwrap();
    assert_eq!(snapshot.bookings, vec![booking]);
    assert_eq!(snapshot.vehicles, vec![vehicle]);
    assert!(snapshot.drivers.is_empty());
}
