use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::assignment::{self, AssignmentOutcome, AssignmentResult};
use super::Engine;

use crate::{
    auth::User,
    config::AssignmentMode,
    db::ChangeSet,
    entities::{Booking, Released},
    error::{not_found_error, Error},
    external::notifier::Notification,
};

impl Engine {
    pub(super) async fn booking_record(&self, id: &Uuid) -> Result<Arc<Mutex<Booking>>, Error> {
        self.bookings
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(not_found_error)
    }

    /// Persists a new booking, then adds it to the book.
    pub(super) async fn insert_booking(&self, booking: Booking) -> Result<(), Error> {
        self.store
            .commit(ChangeSet::default().booking(booking.clone()))
            .await?;

        self.bookings
            .write()
            .await
            .insert(booking.id, Arc::new(Mutex::new(booking)));

        Ok(())
    }

    /// Authorizes `action` against the current booking, then applies `f` to
    /// it under the booking's lock. The change is kept only once it has been
    /// committed.
    #[tracing::instrument(skip(self, f))]
    pub(super) async fn update_booking<F>(
        &self,
        user: &User,
        action: &str,
        id: &Uuid,
        f: F,
    ) -> Result<Booking, Error>
    where
        F: FnOnce(&mut Booking) -> Result<(), Error> + Send,
    {
        let record = self.booking_record(id).await?;
        let mut booking = record.lock().await;

        self.authorize(user.clone(), action.to_string(), booking.clone())?;

        let mut updated = booking.clone();
        f(&mut updated)?;

        self.store
            .commit(ChangeSet::default().booking(updated.clone()))
            .await?;
        *booking = updated.clone();

        Ok(updated)
    }

    /// Adds the driver and car records as they will look once `released`
    /// is applied. The pool itself is left alone until the change is
    /// committed.
    pub(super) async fn stage_release(&self, released: Released, changes: ChangeSet) -> ChangeSet {
        let driver = self.pool.driver(&released.driver_id).await.map(|mut driver| {
            driver.release();
            driver
        });

        let vehicle = match released.car_id {
            Some(car_id) => self.pool.vehicle(&car_id).await.map(|mut vehicle| {
                vehicle.release();
                vehicle
            }),
            None => None,
        };

        changes.driver(driver).vehicle(vehicle)
    }

    /// Returns a booking's driver and car to the pool.
    pub(super) async fn apply_release(&self, released: Released) {
        self.pool.release(released.driver_id).await;

        if let Some(car_id) = released.car_id {
            self.pool.release_vehicle(car_id).await;
        }
    }

    pub(super) async fn notify_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let booking_id = notification.booking_id();

            if let Err(err) = self.notifier.notify(notification).await {
                tracing::warn!(%booking_id, "failed to deliver notification: {}", err);
            }
        }
    }

    /// Runs assignment for `id` the way the engine is configured to: inline,
    /// or on a background task.
    pub(super) async fn schedule_dispatch(&self, id: Uuid) -> Result<Booking, Error> {
        match self.settings.assignment_mode {
            AssignmentMode::Sync => self.dispatch(id).await,
            AssignmentMode::Background => {
                let engine = self.clone();

                tokio::spawn(async move {
                    if let Err(err) = engine.dispatch(id).await {
                        tracing::error!(booking_id = %id, "background assignment failed: {}", err);
                    }
                });

                let record = self.booking_record(&id).await?;
                let booking = record.lock().await.clone();
                Ok(booking)
            }
        }
    }

    /// Finds and reserves a driver for a PENDING booking and records the
    /// outcome. Bookings in any other state are returned unchanged.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn dispatch(&self, id: Uuid) -> Result<Booking, Error> {
        let snapshot = {
            let record = self.booking_record(&id).await?;
            let booking = record.lock().await;
            booking.clone()
        };

        if !snapshot.is_pending() {
            tracing::info!("booking is not PENDING, skipping assignment");
            return Ok(snapshot);
        }

        let requested = self
            .pool
            .vehicle(&snapshot.requested_car_id)
            .await
            .ok_or_else(not_found_error)?;

        let outcome = assignment::assign(&self.pool, &snapshot, &requested).await?;

        self.commit_assignment(id, outcome).await
    }

    /// Records an assignment outcome. If the booking left PENDING while the
    /// driver was being found (cancelled or swept), the reservation is handed
    /// back instead.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn commit_assignment(
        &self,
        id: Uuid,
        outcome: AssignmentOutcome,
    ) -> Result<Booking, Error> {
        let record = self.booking_record(&id).await?;
        let mut booking = record.lock().await;

        match outcome {
            AssignmentOutcome::Assigned(AssignmentResult { driver_id, car_id }) => {
                let reservation = Released {
                    driver_id,
                    car_id: Some(car_id),
                };

                if !booking.is_pending() {
                    tracing::info!(%driver_id, "booking left PENDING during assignment, releasing driver");

                    let changes = self.stage_release(reservation, ChangeSet::default()).await;
                    self.apply_release(reservation).await;
                    self.store.commit(changes).await?;

                    return Ok(booking.clone());
                }

                let driver = self.pool.driver(&driver_id).await;
                let name = driver.as_ref().map(|d| d.name.clone()).unwrap_or_default();

                let mut updated = booking.clone();
                let committed = match updated.assign(
                    driver_id,
                    car_id,
                    format!("Driver {} has been assigned to your booking.", name),
                ) {
                    Ok(()) => {
                        let changes = ChangeSet::default()
                            .booking(updated.clone())
                            .driver(driver)
                            .vehicle(self.pool.vehicle(&car_id).await);
                        self.store.commit(changes).await
                    }
                    Err(err) => Err(err),
                };

                if let Err(err) = committed {
                    tracing::error!(%driver_id, "assignment not recorded, releasing driver: {}", err);
                    self.apply_release(reservation).await;
                    return Err(err);
                }

                *booking = updated.clone();
                drop(booking);

                tracing::info!(%driver_id, %car_id, "booking confirmed");
                self.notify_all(Notification::assigned(&updated, driver_id))
                    .await;

                Ok(updated)
            }
            AssignmentOutcome::NoDriverAvailable => {
                if !booking.is_pending() {
                    return Ok(booking.clone());
                }

                let mut updated = booking.clone();
                updated.mark_unassigned()?;

                self.store
                    .commit(ChangeSet::default().booking(updated.clone()))
                    .await?;
                *booking = updated.clone();

                drop(booking);

                tracing::warn!("no driver available, booking is UNASSIGNED");
                self.notify_all(vec![Notification::unassigned(&updated)])
                    .await;

                Ok(updated)
            }
        }
    }
}
