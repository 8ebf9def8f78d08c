//! Load simulation.
//!
//! Registers a fleet and a crowd of drivers around Colombo, then fires
//! bookings at the engine from many workers at once. Some bookings are
//! cancelled and some are driven to completion while others are still being
//! assigned, so drivers are released and re-reserved concurrently. The report
//! counts outcomes and any driver found on two active bookings.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::{Duration, Utc};
use rand_distr::{Binomial, Distribution, Normal, Uniform};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{BookingAPI, DriverAPI, VehicleAPI};
use crate::auth::User;
use crate::engine::Engine;
use crate::entities::{
    BookingRequest, Coordinates, DriverRegistration, Status, VehicleRegistration,
};
use crate::error::{unexpected_error, Error};

const COLOMBO: Coordinates = Coordinates {
    lat: 6.9271,
    lng: 79.8612,
};

#[derive(Clone, Copy, Debug)]
pub struct SimulationConfig {
    pub fleet_size: usize,
    pub drivers: usize,
    pub bookings: usize,
    pub workers: usize,
    pub cancel_probability: f64,
    pub complete_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fleet_size: 10,
            drivers: 50,
            bookings: 200,
            workers: 16,
            cancel_probability: 0.2,
            complete_probability: 0.4,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub confirmed: usize,
    pub in_progress: usize,
    pub unassigned: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Drivers holding more than one active booking, or whose own record
    /// points at a different booking.
    pub double_assigned: usize,
}

impl Report {
    pub fn total(&self) -> usize {
        self.confirmed + self.in_progress + self.unassigned + self.completed + self.cancelled
    }
}

fn sample_binomial(p: f64) -> bool {
    match Binomial::new(1, p) {
        Ok(bin) => bin.sample(&mut rand::thread_rng()) > 0,
        Err(_) => false,
    }
}

fn sample_location() -> Coordinates {
    let mut rng = rand::thread_rng();

    match (Normal::new(COLOMBO.lat, 0.03), Normal::new(COLOMBO.lng, 0.03)) {
        (Ok(lat), Ok(lng)) => Coordinates::new(lat.sample(&mut rng), lng.sample(&mut rng)),
        _ => COLOMBO,
    }
}

fn fleet_car(index: usize) -> VehicleRegistration {
    VehicleRegistration {
        brand: "Toyota".into(),
        model: "Axio".into(),
        license_plate: format!("SIM-{:04}", index),
        capacity: 4,
        base_rate: Decimal::new(1000, 0),
        driver_rate: Decimal::new(500, 0),
        category_id: "sedan".into(),
    }
}

/// Invalid state is an expected outcome of racing transitions.
fn tolerate_invalid_state<T>(result: Result<T, Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_invalid_state_error() => {
            tracing::warn!("invalid state error");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

struct Simulation {
    e: Engine,
    config: SimulationConfig,
    admin: User,
    car_ids: Mutex<Vec<Uuid>>,
    driver_ids: Mutex<HashSet<Uuid>>,
}

impl Simulation {
    async fn add_car(&self, index: usize) -> Result<(), Error> {
        let vehicle = self
            .e
            .register_vehicle(self.admin.clone(), fleet_car(index))
            .await?;

        self.car_ids.lock().await.push(vehicle.id);

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn add_driver(&self, index: usize) -> Result<(), Error> {
        let user = User::new(Uuid::new_v4(), &["driver"]);

        let own_car = sample_binomial(0.3).then(|| fleet_car(10_000 + index));

        let driver = self
            .e
            .register_driver(
                user.clone(),
                DriverRegistration {
                    name: format!("driver-{}", index),
                    contact: format!("07{:08}", index),
                    vehicle: own_car,
                },
            )
            .await?;

        self.e
            .update_driver_location(user.clone(), driver.id, sample_location())
            .await?;
        self.e
            .set_driver_availability(user.clone(), driver.id, true)
            .await?;

        self.driver_ids.lock().await.insert(driver.id);

        Ok(())
    }

    async fn sample_car(&self) -> Result<Uuid, Error> {
        let car_ids = self.car_ids.lock().await;

        if car_ids.is_empty() {
            return Err(unexpected_error());
        }

        let index = Uniform::from(0..car_ids.len()).sample(&mut rand::thread_rng());
        Ok(car_ids[index])
    }

    #[tracing::instrument(skip(self))]
    async fn add_booking(&self) -> Result<(), Error> {
        let customer = User::new(Uuid::new_v4(), &["customer"]);

        let request = BookingRequest {
            customer_id: customer.id,
            car_id: self.sample_car().await?,
            pickup_location: "pickup".into(),
            destination: "drop".into(),
            pickup_coords: sample_location(),
            drop_coords: sample_location(),
            scheduled_pickup_at: Utc::now() + Duration::hours(1),
            driver_required: sample_binomial(0.8),
        };

        let booking = self.e.create_booking(customer.clone(), request).await?;

        let driver_id = match (booking.status, booking.driver_id) {
            (Status::Confirmed, Some(driver_id)) => driver_id,
            _ => return Ok(()),
        };

        if sample_binomial(self.config.cancel_probability) {
            tracing::info!("customer cancels");
            return tolerate_invalid_state(
                self.e
                    .cancel_booking(customer, booking.id, "changed plans".into())
                    .await,
            );
        }

        if sample_binomial(self.config.complete_probability) {
            let driver = User::new(driver_id, &["driver"]);

            tolerate_invalid_state(self.e.accept_booking(driver.clone(), booking.id).await)?;
            tolerate_invalid_state(self.e.start_booking(driver.clone(), booking.id).await)?;
            tolerate_invalid_state(self.e.complete_booking(driver, booking.id).await)?;
        }

        Ok(())
    }

    async fn report(&self) -> Result<Report, Error> {
        let bookings = self.e.list_bookings(self.admin.clone()).await?;

        let mut report = Report::default();
        let mut active: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for booking in bookings.iter() {
            match booking.status {
                Status::Confirmed => report.confirmed += 1,
                Status::InProgress => report.in_progress += 1,
                Status::Unassigned | Status::Pending => report.unassigned += 1,
                Status::Completed => report.completed += 1,
                Status::Cancelled => report.cancelled += 1,
            }

            if let (Status::Confirmed | Status::InProgress, Some(driver_id)) =
                (booking.status, booking.driver_id)
            {
                active.entry(driver_id).or_default().push(booking.id);
            }
        }

        for (driver_id, booking_ids) in active.iter() {
            let held = match self.e.pool().driver(driver_id).await {
                Some(driver) => driver.active_booking_id,
                None => None,
            };

            if booking_ids.len() > 1 || held != Some(booking_ids[0]) {
                tracing::error!(%driver_id, "driver holds {:?}, bookings {:?}", held, booking_ids);
                report.double_assigned += 1;
            }
        }

        Ok(report)
    }
}

pub struct Executor {
    s: Arc<Simulation>,
}

impl Executor {
    #[tracing::instrument(name = "Executor::new", skip(e))]
    pub fn new(e: Engine, config: SimulationConfig) -> Self {
        Self {
            s: Arc::new(Simulation {
                e,
                config,
                admin: User::new(Uuid::new_v4(), &["admin"]),
                car_ids: Mutex::new(vec![]),
                driver_ids: Mutex::new(HashSet::new()),
            }),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<Report, Error> {
        for index in 0..self.s.config.fleet_size {
            self.s.add_car(index).await?;
        }

        self.initialize_drivers().await;
        self.initialize_bookings().await;

        let report = self.s.report().await?;

        tracing::info!(
            "{} drivers on duty, report: {:?}",
            self.s.driver_ids.lock().await.len(),
            report
        );

        Ok(report)
    }

    #[tracing::instrument(skip(self))]
    async fn initialize_drivers(&self) {
        let (tx, rx): (Sender<usize>, Receiver<usize>) = async_channel::unbounded();

        let mut handles = vec![];
        for _ in 0..self.s.config.workers {
            let rx = rx.clone();
            let s = self.s.clone();

            let handle = tokio::spawn(async move {
                while let Ok(index) = rx.recv().await {
                    if let Err(err) = s.add_driver(index).await {
                        tracing::error!("failed to add driver: {}", err);
                    }
                }
            });

            handles.push(handle);
        }

        let drivers = self.s.config.drivers;
        handles.push(tokio::spawn(async move {
            for index in 0..drivers {
                if tx.send(index).await.is_err() {
                    break;
                }
            }
        }));

        futures::future::join_all(handles).await;
    }

    #[tracing::instrument(skip(self))]
    async fn initialize_bookings(&self) {
        let (tx, rx): (Sender<()>, Receiver<()>) = async_channel::unbounded();

        let mut handles = vec![];
        for _ in 0..self.s.config.workers {
            let rx = rx.clone();
            let s = self.s.clone();

            let handle = tokio::spawn(async move {
                while rx.recv().await.is_ok() {
                    if let Err(err) = s.add_booking().await {
                        tracing::error!("failed to add booking: {}", err);
                    }
                }
            });

            handles.push(handle);
        }

        let bookings = self.s.config.bookings;
        handles.push(tokio::spawn(async move {
            for _ in 0..bookings {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        }));

        futures::future::join_all(handles).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simulation_never_double_assigns_test() {
    use crate::db::{MemoryStore, Store};
    use crate::engine::Settings;
    use crate::external::notifier::{LogNotifier, Notifier};

    let engine = Engine::new(
        Arc::new(MemoryStore::new()) as Arc<dyn Store>,
        Arc::new(LogNotifier) as Arc<dyn Notifier>,
        Settings::default(),
    )
    .await
    .unwrap();

    let config = SimulationConfig {
        fleet_size: 5,
        drivers: 20,
        bookings: 80,
        workers: 8,
        ..SimulationConfig::default()
    };

    let report = Executor::new(engine, config).run().await.unwrap();

    assert_eq!(report.double_assigned, 0);
    assert_eq!(report.total(), 80);
    assert!(report.confirmed + report.in_progress + report.completed + report.cancelled > 0);
}
