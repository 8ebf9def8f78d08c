//! Registry of drivers and vehicles.
//!
//! Every record sits behind its own mutex. The maps themselves are only
//! write-locked to register or drop records, so reservations for different
//! drivers never contend with each other. The only await under a record lock
//! is the one persisting a driver update.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::entities::{Coordinates, Driver, Vehicle};
use crate::error::{not_found_error, validation_error, Error};
use crate::geo;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSettings {
    pub search_radius_km: f64,
    pub location_ttl: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            search_radius_km: 50.0,
            location_ttl: Duration::seconds(300),
        }
    }
}

/// What the booked car asks of a driver who brings their own vehicle.
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleCriteria {
    pub category_id: String,
    pub capacity: u32,
}

impl From<&Vehicle> for VehicleCriteria {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            category_id: vehicle.category_id.clone(),
            capacity: vehicle.capacity,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub driver_id: Uuid,
    /// The driver's own car, if they have one.
    pub vehicle_id: Option<Uuid>,
    pub distance_km: f64,
}

type Record<T> = Arc<Mutex<T>>;

#[derive(Debug, Default)]
pub struct DriverPool {
    drivers: RwLock<HashMap<Uuid, Record<Driver>>>,
    vehicles: RwLock<HashMap<Uuid, Record<Vehicle>>>,
    settings: PoolSettings,
}

impl DriverPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
            vehicles: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    pub async fn register_driver(&self, driver: Driver) -> Result<(), Error> {
        let mut drivers = self.drivers.write().await;

        if drivers.contains_key(&driver.id) {
            return Err(validation_error("driver already registered"));
        }

        drivers.insert(driver.id, Arc::new(Mutex::new(driver)));

        Ok(())
    }

    pub async fn register_vehicle(&self, vehicle: Vehicle) -> Result<(), Error> {
        let mut vehicles = self.vehicles.write().await;

        if vehicles.contains_key(&vehicle.id) {
            return Err(validation_error("vehicle already registered"));
        }

        vehicles.insert(vehicle.id, Arc::new(Mutex::new(vehicle)));

        Ok(())
    }

    /// Drops a driver whose registration could not be completed.
    pub async fn unregister_driver(&self, id: &Uuid) -> Option<Driver> {
        let record = self.drivers.write().await.remove(id)?;
        let driver = record.lock().await.clone();
        Some(driver)
    }

    pub async fn unregister_vehicle(&self, id: &Uuid) -> Option<Vehicle> {
        let record = self.vehicles.write().await.remove(id)?;
        let vehicle = record.lock().await.clone();
        Some(vehicle)
    }

    async fn driver_record(&self, id: &Uuid) -> Option<Record<Driver>> {
        self.drivers.read().await.get(id).cloned()
    }

    async fn vehicle_record(&self, id: &Uuid) -> Option<Record<Vehicle>> {
        self.vehicles.read().await.get(id).cloned()
    }

    pub async fn driver(&self, id: &Uuid) -> Option<Driver> {
        let record = self.driver_record(id).await?;
        let driver = record.lock().await.clone();
        Some(driver)
    }

    pub async fn vehicle(&self, id: &Uuid) -> Option<Vehicle> {
        let record = self.vehicle_record(id).await?;
        let vehicle = record.lock().await.clone();
        Some(vehicle)
    }

    pub async fn drivers(&self) -> Vec<Driver> {
        let records: Vec<Record<Driver>> = self.drivers.read().await.values().cloned().collect();

        let mut drivers = Vec::with_capacity(records.len());
        for record in records {
            drivers.push(record.lock().await.clone());
        }

        drivers.sort_by_key(|driver| driver.created_at);
        drivers
    }

    pub async fn vehicles(&self) -> Vec<Vehicle> {
        let records: Vec<Record<Vehicle>> =
            self.vehicles.read().await.values().cloned().collect();

        let mut vehicles = Vec::with_capacity(records.len());
        for record in records {
            vehicles.push(record.lock().await.clone());
        }

        vehicles.sort_by(|a, b| a.license_plate.cmp(&b.license_plate));
        vehicles
    }

    /// Applies `f` to a copy of the driver and hands it to `persist`, all
    /// under the driver's lock. The record only changes once both succeed.
    pub async fn update_driver<F, P, Fut>(&self, id: &Uuid, f: F, persist: P) -> Result<Driver, Error>
    where
        F: FnOnce(&mut Driver) -> Result<(), Error>,
        P: FnOnce(Driver) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let record = self.driver_record(id).await.ok_or_else(not_found_error)?;
        let mut driver = record.lock().await;

        let mut updated = driver.clone();
        f(&mut updated)?;
        persist(updated.clone()).await?;
        *driver = updated.clone();

        Ok(updated)
    }

    /// Eligible drivers for a pickup, nearest first, ties broken by the
    /// smallest driver id.
    #[tracing::instrument(skip(self))]
    pub async fn find_eligible(
        &self,
        pickup: Coordinates,
        criteria: &VehicleCriteria,
    ) -> Result<Vec<Candidate>, Error> {
        pickup.validate()?;

        let now = Utc::now();
        let records: Vec<Record<Driver>> = self.drivers.read().await.values().cloned().collect();

        let mut candidates = vec![];

        for record in records {
            let driver = record.lock().await.clone();

            if !driver.is_available() || !driver.has_fresh_location(self.settings.location_ttl, now)
            {
                continue;
            }

            let location = match driver.current_location {
                Some(location) => location,
                None => continue,
            };

            if let Some(vehicle_id) = driver.vehicle_id {
                match self.vehicle(&vehicle_id).await {
                    Some(vehicle)
                        if vehicle.is_available()
                            && vehicle.category_id == criteria.category_id
                            && vehicle.capacity >= criteria.capacity => {}
                    _ => continue,
                }
            }

            let distance_km = geo::distance_km(location, pickup)?;

            if distance_km > self.settings.search_radius_km {
                continue;
            }

            candidates.push(Candidate {
                driver_id: driver.id,
                vehicle_id: driver.vehicle_id,
                distance_km,
            });
        }

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });

        tracing::debug!("found {} eligible drivers", candidates.len());

        Ok(candidates)
    }

    /// Claims the driver for `booking_id` if and only if they are still
    /// available. Returns false when another booking got there first.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, driver_id: Uuid, booking_id: Uuid) -> bool {
        let record = match self.driver_record(&driver_id).await {
            Some(record) => record,
            None => return false,
        };

        let mut driver = record.lock().await;
        driver.reserve(booking_id).is_ok()
    }

    /// Returns the driver to the pool. Safe to call more than once.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, driver_id: Uuid) -> Option<Driver> {
        let record = self.driver_record(&driver_id).await?;
        let mut driver = record.lock().await;

        driver.release();
        Some(driver.clone())
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve_vehicle(&self, vehicle_id: Uuid, driver_id: Uuid) -> bool {
        let record = match self.vehicle_record(&vehicle_id).await {
            Some(record) => record,
            None => return false,
        };

        let mut vehicle = record.lock().await;
        vehicle.reserve(driver_id).is_ok()
    }

    #[tracing::instrument(skip(self))]
    pub async fn release_vehicle(&self, vehicle_id: Uuid) -> Option<Vehicle> {
        let record = self.vehicle_record(&vehicle_id).await?;
        let mut vehicle = record.lock().await;

        vehicle.release();
        Some(vehicle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::sample_registration;

    async fn on_duty(pool: &DriverPool, id: Uuid, at: Coordinates) {
        let mut driver = Driver::new(id, "driver".into(), "0770000000".into(), None);
        driver.update_location(at).unwrap();
        driver.set_availability(true).unwrap();
        pool.register_driver(driver).await.unwrap();
    }

    fn sedan() -> VehicleCriteria {
        VehicleCriteria {
            category_id: "sedan".into(),
            capacity: 4,
        }
    }

    const PICKUP: Coordinates = Coordinates {
        lat: 6.9271,
        lng: 79.8612,
    };

    #[tokio::test]
    async fn orders_by_distance_then_id() {
        let pool = DriverPool::default();

        let far = Uuid::from_u128(1);
        let near_b = Uuid::from_u128(3);
        let near_a = Uuid::from_u128(2);

        on_duty(&pool, far, Coordinates::new(7.0, 79.9)).await;
        on_duty(&pool, near_b, Coordinates::new(6.93, 79.87)).await;
        on_duty(&pool, near_a, Coordinates::new(6.93, 79.87)).await;

        let candidates = pool.find_eligible(PICKUP, &sedan()).await.unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.driver_id).collect();

        assert_eq!(ids, vec![near_a, near_b, far]);
        assert!(candidates[0].distance_km <= candidates[2].distance_km);
    }

    #[tokio::test]
    async fn skips_unavailable_and_distant_drivers() {
        let pool = DriverPool::new(PoolSettings {
            search_radius_km: 10.0,
            ..PoolSettings::default()
        });

        let available = Uuid::new_v4();
        let busy = Uuid::new_v4();
        let distant = Uuid::new_v4();
        let never_located = Uuid::new_v4();

        on_duty(&pool, available, Coordinates::new(6.93, 79.87)).await;
        on_duty(&pool, busy, Coordinates::new(6.93, 79.87)).await;
        on_duty(&pool, distant, Coordinates::new(7.2906, 80.6337)).await;
        pool.register_driver(Driver::new(never_located, "x".into(), "y".into(), None))
            .await
            .unwrap();

        assert!(pool.reserve(busy, Uuid::new_v4()).await);

        let candidates = pool.find_eligible(PICKUP, &sedan()).await.unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.driver_id).collect();

        assert_eq!(ids, vec![available]);
    }

    #[tokio::test]
    async fn own_vehicle_must_match_category_and_capacity() {
        let pool = DriverPool::default();

        let small_owner = Uuid::new_v4();
        let mut small = sample_registration();
        small.capacity = 2;
        let small = Vehicle::new(small, Some(small_owner));

        let van_owner = Uuid::new_v4();
        let mut van = sample_registration();
        van.category_id = "van".into();
        van.capacity = 8;
        let van = Vehicle::new(van, Some(van_owner));

        let fit_owner = Uuid::new_v4();
        let fit = Vehicle::new(sample_registration(), Some(fit_owner));

        for (owner, vehicle) in [(small_owner, small), (van_owner, van), (fit_owner, fit)] {
            let mut driver = Driver::new(owner, "d".into(), "c".into(), Some(vehicle.id));
            driver.update_location(Coordinates::new(6.93, 79.87)).unwrap();
            driver.set_availability(true).unwrap();
            pool.register_vehicle(vehicle).await.unwrap();
            pool.register_driver(driver).await.unwrap();
        }

        let candidates = pool.find_eligible(PICKUP, &sedan()).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].driver_id, fit_owner);
        assert!(candidates[0].vehicle_id.is_some());
    }

    #[tokio::test]
    async fn reserve_is_exclusive_and_release_idempotent() {
        let pool = DriverPool::default();
        let driver_id = Uuid::new_v4();
        on_duty(&pool, driver_id, PICKUP).await;

        let first = Uuid::new_v4();
        assert!(pool.reserve(driver_id, first).await);
        assert!(!pool.reserve(driver_id, Uuid::new_v4()).await);
        assert_eq!(
            pool.driver(&driver_id).await.unwrap().active_booking_id,
            Some(first)
        );

        pool.release(driver_id).await.unwrap();
        let driver = pool.release(driver_id).await.unwrap();
        assert!(driver.is_available());

        assert!(!pool.reserve(Uuid::new_v4(), first).await);
        assert!(pool.release(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_have_one_winner() {
        let pool = Arc::new(DriverPool::default());
        let driver_id = Uuid::new_v4();
        on_duty(&pool, driver_id, PICKUP).await;

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.reserve(driver_id, Uuid::new_v4()).await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn update_driver_leaves_record_on_error() {
        let pool = DriverPool::default();
        let driver_id = Uuid::new_v4();
        on_duty(&pool, driver_id, PICKUP).await;

        let result = pool
            .update_driver(
                &driver_id,
                |driver| {
                    driver.name = "changed".into();
                    Err(validation_error("nope"))
                },
                |_| async { Ok::<(), Error>(()) },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(pool.driver(&driver_id).await.unwrap().name, "driver");

        let result = pool
            .update_driver(
                &driver_id,
                |driver| {
                    driver.name = "changed".into();
                    Ok(())
                },
                |_| async { Err::<(), Error>(crate::error::database_error("down")) },
            )
            .await;

        assert!(result.unwrap_err().is_internal());
        assert_eq!(pool.driver(&driver_id).await.unwrap().name, "driver");

        let updated = pool
            .update_driver(
                &driver_id,
                |driver| {
                    driver.name = "changed".into();
                    Ok(())
                },
                |_| async { Ok::<(), Error>(()) },
            )
            .await
            .unwrap();
        assert_eq!(updated, pool.driver(&driver_id).await.unwrap());

        assert!(pool
            .update_driver(&Uuid::new_v4(), |_| Ok(()), |_| async { Ok::<(), Error>(()) })
            .await
            .unwrap_err()
            .is_not_found_error());
    }

    #[tokio::test]
    async fn unregister_removes_records() {
        let pool = DriverPool::default();
        let driver_id = Uuid::new_v4();
        on_duty(&pool, driver_id, PICKUP).await;

        let vehicle = Vehicle::new(sample_registration(), Some(driver_id));
        pool.register_vehicle(vehicle.clone()).await.unwrap();

        assert_eq!(pool.unregister_driver(&driver_id).await.unwrap().id, driver_id);
        assert_eq!(pool.unregister_vehicle(&vehicle.id).await, Some(vehicle));
        assert!(pool.driver(&driver_id).await.is_none());
        assert!(pool.vehicles().await.is_empty());
        assert!(pool.unregister_driver(&driver_id).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let pool = DriverPool::default();
        let driver_id = Uuid::new_v4();
        on_duty(&pool, driver_id, PICKUP).await;

        let again = Driver::new(driver_id, "dup".into(), "dup".into(), None);
        assert!(pool.register_driver(again).await.is_err());
    }
}
