use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    api::BookingAPI,
    auth::{Platform, User},
    db::ChangeSet,
    entities::{Booking, BookingRequest, Status},
    error::{invalid_state_error, unauthorized_error, validation_error, Error},
    external::notifier::Notification,
    geo,
};

#[async_trait]
impl BookingAPI for Engine {
    #[tracing::instrument(skip(self, request))]
    async fn create_booking(&self, user: User, request: BookingRequest) -> Result<Booking, Error> {
        self.authorize(user.clone(), "create_booking", Platform::default())?;

        if request.customer_id != user.id && !user.is("admin") {
            return Err(unauthorized_error());
        }

        request.validate(Utc::now())?;

        let vehicle = self
            .pool
            .vehicle(&request.car_id)
            .await
            .ok_or_else(|| validation_error("unknown car"))?;

        let distance_km = geo::distance_km(request.pickup_coords, request.drop_coords)?;
        let fare = self
            .settings
            .fare
            .quote(&vehicle, distance_km, request.driver_required)?;

        let booking = Booking::new(request, distance_km, fare);
        let id = booking.id;

        tracing::info!(booking_id = %id, total = %fare.total, "booking created");

        self.insert_booking(booking).await?;

        self.schedule_dispatch(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_booking(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        let record = self.booking_record(&id).await?;
        let booking = record.lock().await.clone();

        self.authorize(user.clone(), "read", booking.clone())?;

        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    async fn list_bookings(&self, user: User) -> Result<Vec<Booking>, Error> {
        self.authorize(user.clone(), "list_bookings", Platform::default())?;

        let records: Vec<_> = self.bookings.read().await.values().cloned().collect();

        let mut bookings = vec![];
        for record in records {
            let booking = record.lock().await.clone();

            if user.is_privileged()
                || booking.customer_id == user.id
                || booking.driver_id == Some(user.id)
            {
                bookings.push(booking);
            }
        }

        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(bookings)
    }

    #[tracing::instrument(skip(self))]
    async fn assign_driver(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        {
            let record = self.booking_record(&id).await?;
            let mut booking = record.lock().await;

            match booking.status {
                Status::Pending => {
                    self.authorize(user.clone(), "assign", booking.clone())?;
                }
                Status::Unassigned => {
                    self.authorize(user.clone(), "retry", booking.clone())?;

                    let mut updated = booking.clone();
                    updated.reopen()?;

                    self.store
                        .commit(ChangeSet::default().booking(updated.clone()))
                        .await?;
                    *booking = updated;

                    tracing::info!("booking reopened for assignment");
                }
                _ => {
                    self.authorize(user.clone(), "read", booking.clone())?;
                    return Err(invalid_state_error());
                }
            }
        }

        self.schedule_dispatch(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn accept_booking(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        self.update_booking(&user, "accept", &id, |booking| booking.accept())
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn start_booking(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        self.update_booking(&user, "start", &id, |booking| booking.start())
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_booking(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        let record = self.booking_record(&id).await?;
        let mut booking = record.lock().await;

        self.authorize(user.clone(), "complete", booking.clone())?;

        let mut updated = booking.clone();
        let released = updated.complete()?;

        let changes = self.stage_release(released, ChangeSet::default()).await;
        self.store.commit(changes.booking(updated.clone())).await?;

        *booking = updated.clone();
        self.apply_release(released).await;

        tracing::info!(driver_id = %released.driver_id, "booking completed, driver released");

        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_booking(
        &self,
        user: User,
        id: Uuid,
        reason: String,
    ) -> Result<Booking, Error> {
        let record = self.booking_record(&id).await?;
        let mut booking = record.lock().await;

        self.authorize(user.clone(), "cancel", booking.clone())?;

        let mut updated = booking.clone();
        let released = updated.cancel(&reason, self.settings.refund_rate)?;

        let changes = match released {
            Some(released) => self.stage_release(released, ChangeSet::default()).await,
            None => ChangeSet::default(),
        };
        self.store.commit(changes.booking(updated.clone())).await?;

        *booking = updated.clone();
        if let Some(released) = released {
            self.apply_release(released).await;
        }

        drop(booking);

        tracing::info!(refund = ?updated.refund_amount, "booking cancelled");

        if let Some(released) = released {
            self.notify_all(vec![Notification::cancelled(&updated, released.driver_id)])
                .await;
        }

        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    async fn expire_pending(&self, user: User) -> Result<Vec<Booking>, Error> {
        self.authorize(user.clone(), "expire_pending", Platform::default())?;

        let cutoff = Utc::now() - self.settings.pending_timeout;
        let records: Vec<_> = self.bookings.read().await.values().cloned().collect();

        let mut expired = vec![];

        for record in records {
            let mut booking = record.lock().await;

            if !booking.is_pending() || booking.updated_at > cutoff {
                continue;
            }

            let mut updated = booking.clone();
            updated.mark_unassigned()?;

            if let Err(err) = self
                .store
                .commit(ChangeSet::default().booking(updated.clone()))
                .await
            {
                tracing::error!(booking_id = %updated.id, "failed to expire booking: {}", err);
                continue;
            }
            *booking = updated.clone();

            expired.push(updated);
        }

        if !expired.is_empty() {
            tracing::info!("expired {} pending bookings", expired.len());
        }

        self.notify_all(expired.iter().map(Notification::unassigned).collect())
            .await;

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, COLOMBO};
    use super::super::{AssignmentOutcome, Settings};
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::Duration;
    use rust_decimal::Decimal;

    use crate::config::AssignmentMode;
    use crate::db::Store;
    use crate::entities::{Coordinates, NO_DRIVER_MESSAGE};

    #[tokio::test]
    async fn create_booking_assigns_nearest_driver() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;

        let _far = harness.on_duty_driver(Coordinates::new(7.05, 79.9)).await;
        let near = harness.on_duty_driver(Coordinates::new(6.93, 79.862)).await;

        let customer = harness.customer();
        let booking = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();

        assert_eq!(booking.status, Status::Confirmed);
        assert_eq!(booking.driver_id, Some(near.id));
        assert_eq!(booking.car_id, Some(car.id));
        assert_eq!(booking.fare.total, Decimal::new(301571, 2));
        assert_eq!(
            booking.driver_assignment_message.as_deref(),
            Some("Driver Nimal has been assigned to your booking.")
        );

        let sent = harness.sent().await;
        assert_eq!(sent, Notification::assigned(&booking, near.id));

        let stored = harness.store.load().await.unwrap();
        assert_eq!(stored.bookings, vec![booking.clone()]);
        assert_eq!(stored.drivers[0].active_booking_id, Some(booking.id));
    }

    #[tokio::test]
    async fn no_driver_leaves_booking_unassigned_until_retry() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let customer = harness.customer();

        let booking = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();

        assert_eq!(booking.status, Status::Unassigned);
        assert_eq!(booking.driver_id, None);
        assert_eq!(
            booking.driver_assignment_message.as_deref(),
            Some(NO_DRIVER_MESSAGE)
        );
        assert_eq!(harness.sent().await, vec![Notification::unassigned(&booking)]);

        let driver = harness.on_duty_driver(COLOMBO).await;

        let stranger = harness.customer();
        let err = harness
            .engine
            .assign_driver(stranger, booking.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let booking = harness
            .engine
            .assign_driver(customer.clone(), booking.id)
            .await
            .unwrap();

        assert_eq!(booking.status, Status::Confirmed);
        assert_eq!(booking.driver_id, Some(driver.id));

        let err = harness
            .engine
            .assign_driver(customer, booking.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_state_error());
    }

    #[tokio::test]
    async fn create_booking_validates_request() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let customer = harness.customer();

        let mut request = harness.request(&customer, &car);
        request.pickup_coords = Coordinates::new(91.0, 0.0);
        let err = harness
            .engine
            .create_booking(customer.clone(), request)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let mut request = harness.request(&customer, &car);
        request.car_id = Uuid::new_v4();
        let err = harness
            .engine
            .create_booking(customer.clone(), request)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let someone_else = harness.customer();
        let request = harness.request(&someone_else, &car);
        let err = harness
            .engine
            .create_booking(customer.clone(), request)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        assert!(harness
            .engine
            .list_bookings(harness.admin.clone())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bookings_never_share_a_driver() {
        let harness = Arc::new(Harness::new(Settings::default()).await);

        let drivers = 5;
        let bookings = 12;

        for i in 0..drivers {
            harness
                .on_duty_driver(Coordinates::new(6.92 + i as f64 * 0.001, 79.86))
                .await;
        }

        let mut cars = vec![];
        for _ in 0..bookings {
            cars.push(harness.fleet_car().await);
        }

        let handles: Vec<_> = cars
            .into_iter()
            .map(|car| {
                let harness = harness.clone();
                tokio::spawn(async move {
                    let customer = harness.customer();
                    let request = harness.request(&customer, &car);
                    harness.engine.create_booking(customer, request).await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let results: Vec<Booking> = results
            .into_iter()
            .map(|result| result.unwrap().unwrap())
            .collect();

        let confirmed: Vec<&Booking> = results
            .iter()
            .filter(|booking| booking.status == Status::Confirmed)
            .collect();
        let unassigned = results
            .iter()
            .filter(|booking| booking.status == Status::Unassigned)
            .count();

        assert_eq!(confirmed.len(), drivers);
        assert_eq!(unassigned, bookings - drivers);

        let assigned: HashSet<Uuid> = confirmed.iter().filter_map(|b| b.driver_id).collect();
        assert_eq!(assigned.len(), drivers);

        for booking in confirmed {
            let driver = harness
                .engine
                .pool
                .driver(&booking.driver_id.unwrap())
                .await
                .unwrap();
            assert_eq!(driver.active_booking_id, Some(booking.id));
            assert!(!driver.available);
        }
    }

    #[tokio::test]
    async fn cancel_during_assignment_returns_driver() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        let booking = Booking::new(
            harness.request(&customer, &car),
            28.31,
            harness.engine.settings.fare.quote(&car, 28.31, true).unwrap(),
        );
        harness.engine.insert_booking(booking.clone()).await.unwrap();

        let outcome = super::super::assign(&harness.engine.pool, &booking, &car)
            .await
            .unwrap();
        assert!(matches!(outcome, AssignmentOutcome::Assigned(_)));

        let cancelled = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "plans changed".into())
            .await
            .unwrap();
        assert_eq!(cancelled.status, Status::Cancelled);

        let after = harness
            .engine
            .commit_assignment(booking.id, outcome)
            .await
            .unwrap();

        assert_eq!(after.status, Status::Cancelled);
        assert_eq!(after.driver_id, None);

        let driver = harness.engine.pool.driver(&driver.id).await.unwrap();
        assert!(driver.is_available());
        assert!(harness.engine.pool.vehicle(&car.id).await.unwrap().is_available());
    }

    #[tokio::test]
    async fn driver_lifecycle_and_release() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        let booking = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();

        let err = harness
            .engine
            .start_booking(customer.clone(), booking.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let other_driver = harness.on_duty_driver(COLOMBO).await;
        let err = harness
            .engine
            .start_booking(other_driver, booking.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let err = harness
            .engine
            .complete_booking(driver.clone(), booking.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_state_error());

        let accepted = harness
            .engine
            .accept_booking(driver.clone(), booking.id)
            .await
            .unwrap();
        assert!(accepted.accepted_at.is_some());

        let err = harness
            .engine
            .accept_booking(driver.clone(), booking.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_state_error());

        let started = harness
            .engine
            .start_booking(driver.clone(), booking.id)
            .await
            .unwrap();
        assert_eq!(started.status, Status::InProgress);

        let err = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "too late".into())
            .await
            .unwrap_err();
        assert!(err.is_invalid_state_error());

        let completed = harness
            .engine
            .complete_booking(driver.clone(), booking.id)
            .await
            .unwrap();
        assert_eq!(completed.status, Status::Completed);
        assert_eq!(completed.driver_id, Some(driver.id));

        assert!(harness
            .engine
            .pool
            .driver(&driver.id)
            .await
            .unwrap()
            .is_available());
        assert!(harness.engine.pool.vehicle(&car.id).await.unwrap().is_available());

        let err = harness
            .engine
            .start_booking(driver.clone(), booking.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_state_error());

        let listed = harness.engine.list_bookings(driver).await.unwrap();
        assert_eq!(listed, vec![completed]);
    }

    #[tokio::test]
    async fn cancel_refunds_and_releases_once() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        let booking = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();
        assert_eq!(booking.status, Status::Confirmed);

        let err = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "  ".into())
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let cancelled = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "flight delayed".into())
            .await
            .unwrap();

        assert_eq!(cancelled.status, Status::Cancelled);
        assert_eq!(cancelled.refund_amount, Some(Decimal::new(30157, 2)));
        assert_eq!(cancelled.driver_id, None);

        let err = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "again".into())
            .await
            .unwrap_err();
        assert!(err.is_invalid_state_error());

        let found = harness
            .engine
            .find_booking(customer, booking.id)
            .await
            .unwrap();
        assert_eq!(found, cancelled);

        assert!(harness
            .engine
            .pool
            .driver(&driver.id)
            .await
            .unwrap()
            .is_available());

        let sent = harness.sent().await;
        assert_eq!(
            sent.last(),
            Some(&Notification::cancelled(&cancelled, driver.id))
        );
    }

    #[tokio::test]
    async fn sweep_expires_stale_pending_bookings() {
        let harness = Harness::new(Settings {
            pending_timeout: Duration::zero(),
            ..Settings::default()
        })
        .await;
        let car = harness.fleet_car().await;
        let customer = harness.customer();

        let booking = Booking::new(
            harness.request(&customer, &car),
            28.31,
            harness.engine.settings.fare.quote(&car, 28.31, true).unwrap(),
        );
        harness.engine.insert_booking(booking.clone()).await.unwrap();

        let err = harness
            .engine
            .expire_pending(customer.clone())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let expired = harness
            .engine
            .expire_pending(harness.system.clone())
            .await
            .unwrap();

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, booking.id);
        assert_eq!(expired[0].status, Status::Unassigned);

        let again = harness
            .engine
            .expire_pending(harness.system.clone())
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn background_mode_assigns_eventually() {
        let harness = Harness::new(Settings {
            assignment_mode: AssignmentMode::Background,
            ..Settings::default()
        })
        .await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        let created = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();

        let mut booking = created;
        for _ in 0..100 {
            if booking.status != Status::Pending {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            booking = harness
                .engine
                .find_booking(customer.clone(), booking.id)
                .await
                .unwrap();
        }

        assert_eq!(booking.status, Status::Confirmed);
        assert_eq!(booking.driver_id, Some(driver.id));
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        // vehicles and drivers registered straight into the pool are only
        // persisted once a transition touches them
        let booking = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();

        let restarted = Harness::with_store(harness.store.clone(), Settings::default()).await;

        let found = restarted
            .engine
            .find_booking(customer, booking.id)
            .await
            .unwrap();
        assert_eq!(found, booking);

        let reloaded = restarted.engine.pool.driver(&driver.id).await.unwrap();
        assert_eq!(reloaded.active_booking_id, Some(booking.id));
        assert!(!restarted
            .engine
            .pool
            .vehicle(&car.id)
            .await
            .unwrap()
            .is_available());
    }

    #[tokio::test]
    async fn failed_commit_leaves_transition_undone() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        let booking = harness
            .engine
            .create_booking(customer.clone(), harness.request(&customer, &car))
            .await
            .unwrap();
        assert_eq!(booking.status, Status::Confirmed);

        harness.store.fail_commits(true);

        let err = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "flight delayed".into())
            .await
            .unwrap_err();
        assert!(err.is_internal());

        let err = harness
            .engine
            .accept_booking(driver.clone(), booking.id)
            .await
            .unwrap_err();
        assert!(err.is_internal());

        let found = harness
            .engine
            .find_booking(customer.clone(), booking.id)
            .await
            .unwrap();
        assert_eq!(found, booking);

        let held = harness.engine.pool.driver(&driver.id).await.unwrap();
        assert_eq!(held.active_booking_id, Some(booking.id));
        assert!(!harness.engine.pool.vehicle(&car.id).await.unwrap().is_available());

        let stored = harness.store.load().await.unwrap();
        assert_eq!(stored.bookings, vec![booking.clone()]);

        harness.store.recover().await;

        let cancelled = harness
            .engine
            .cancel_booking(customer.clone(), booking.id, "flight delayed".into())
            .await
            .unwrap();
        assert_eq!(cancelled.status, Status::Cancelled);
        assert_eq!(cancelled.refund_amount, Some(Decimal::new(30157, 2)));
        assert!(harness
            .engine
            .pool
            .driver(&driver.id)
            .await
            .unwrap()
            .is_available());

        let stored = harness.store.load().await.unwrap();
        assert_eq!(stored.bookings, vec![cancelled]);
        assert!(stored.drivers.iter().all(|d| d.active_booking_id.is_none()));
    }

    #[tokio::test]
    async fn failed_assignment_commit_returns_driver() {
        let harness = Harness::new(Settings::default()).await;
        let car = harness.fleet_car().await;
        let driver = harness.on_duty_driver(COLOMBO).await;
        let customer = harness.customer();

        let booking = Booking::new(
            harness.request(&customer, &car),
            28.31,
            harness.engine.settings.fare.quote(&car, 28.31, true).unwrap(),
        );
        harness.engine.insert_booking(booking.clone()).await.unwrap();

        harness.store.fail_booking(booking.id).await;

        let err = harness.engine.dispatch(booking.id).await.unwrap_err();
        assert!(err.is_internal());

        let found = harness
            .engine
            .find_booking(customer.clone(), booking.id)
            .await
            .unwrap();
        assert_eq!(found.status, Status::Pending);
        assert_eq!(found.driver_id, None);
        assert!(harness
            .engine
            .pool
            .driver(&driver.id)
            .await
            .unwrap()
            .is_available());
        assert!(harness.engine.pool.vehicle(&car.id).await.unwrap().is_available());
        assert!(harness.sent().await.is_empty());

        harness.store.recover().await;

        let confirmed = harness
            .engine
            .assign_driver(harness.system.clone(), booking.id)
            .await
            .unwrap();
        assert_eq!(confirmed.status, Status::Confirmed);
        assert_eq!(confirmed.driver_id, Some(driver.id));
    }

    #[tokio::test]
    async fn sweep_continues_past_a_failed_commit() {
        let harness = Harness::new(Settings {
            pending_timeout: Duration::zero(),
            ..Settings::default()
        })
        .await;
        let car = harness.fleet_car().await;
        let customer = harness.customer();

        let mut bookings = vec![];
        for _ in 0..3 {
            let booking = Booking::new(
                harness.request(&customer, &car),
                28.31,
                harness.engine.settings.fare.quote(&car, 28.31, true).unwrap(),
            );
            harness.engine.insert_booking(booking.clone()).await.unwrap();
            bookings.push(booking);
        }

        harness.store.fail_booking(bookings[1].id).await;

        let expired = harness
            .engine
            .expire_pending(harness.system.clone())
            .await
            .unwrap();

        let expired_ids: HashSet<Uuid> = expired.iter().map(|b| b.id).collect();
        assert_eq!(expired_ids, HashSet::from([bookings[0].id, bookings[2].id]));
        assert_eq!(harness.sent().await.len(), 2);

        let stuck = harness
            .engine
            .find_booking(customer.clone(), bookings[1].id)
            .await
            .unwrap();
        assert_eq!(stuck.status, Status::Pending);

        harness.store.recover().await;

        let expired = harness
            .engine
            .expire_pending(harness.system.clone())
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, bookings[1].id);
        assert_eq!(expired[0].status, Status::Unassigned);
    }
}
