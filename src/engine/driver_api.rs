use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::DriverAPI,
    auth::{Platform, User},
    db::ChangeSet,
    entities::{Coordinates, Driver, DriverProfile, DriverRegistration, Vehicle},
    error::{not_found_error, Error},
};

impl Engine {
    /// Authorizes an update of the driver, applies `f` under the driver's
    /// lock and persists the result before it becomes visible.
    async fn update_driver<F>(&self, user: &User, id: &Uuid, f: F) -> Result<Driver, Error>
    where
        F: FnOnce(&mut Driver) -> Result<(), Error> + Send,
    {
        let driver = self.pool.driver(id).await.ok_or_else(not_found_error)?;

        self.authorize(user.clone(), "update", driver)?;

        let store = self.store.clone();
        self.pool
            .update_driver(id, f, |driver| async move {
                store.commit(ChangeSet::default().driver(Some(driver))).await
            })
            .await
    }

    /// Takes a half-registered driver and their car back out of the pool.
    async fn abandon_registration(&self, driver_id: &Uuid, vehicle: Option<&Vehicle>) {
        self.pool.unregister_driver(driver_id).await;

        if let Some(vehicle) = vehicle {
            self.pool.unregister_vehicle(&vehicle.id).await;
        }
    }
}

#[async_trait]
impl DriverAPI for Engine {
    /// Registers the calling user as a driver, along with their own car if
    /// they bring one.
    #[tracing::instrument(skip(self))]
    async fn register_driver(
        &self,
        user: User,
        registration: DriverRegistration,
    ) -> Result<Driver, Error> {
        self.authorize(user.clone(), "register_driver", Platform::default())?;

        registration.validate()?;

        let vehicle = registration
            .vehicle
            .map(|vehicle| Vehicle::new(vehicle, Some(user.id)));

        let driver = Driver::new(
            user.id,
            registration.name,
            registration.contact,
            vehicle.as_ref().map(|vehicle| vehicle.id),
        );

        self.pool.register_driver(driver.clone()).await?;

        if let Some(vehicle) = &vehicle {
            if let Err(err) = self.pool.register_vehicle(vehicle.clone()).await {
                self.abandon_registration(&driver.id, None).await;
                return Err(err);
            }
        }

        let changes = ChangeSet::default()
            .driver(Some(driver.clone()))
            .vehicle(vehicle.clone());

        if let Err(err) = self.store.commit(changes).await {
            self.abandon_registration(&driver.id, vehicle.as_ref()).await;
            return Err(err);
        }

        tracing::info!(driver_id = %driver.id, "driver registered");

        Ok(driver)
    }

    #[tracing::instrument(skip(self))]
    async fn find_driver(&self, user: User, id: Uuid) -> Result<Driver, Error> {
        let driver = self.pool.driver(&id).await.ok_or_else(not_found_error)?;

        self.authorize(user.clone(), "read", driver.clone())?;

        Ok(driver)
    }

    #[tracing::instrument(skip(self))]
    async fn list_drivers(&self, user: User) -> Result<Vec<Driver>, Error> {
        self.authorize(user.clone(), "list_drivers", Platform::default())?;

        Ok(self.pool.drivers().await)
    }

    #[tracing::instrument(skip(self))]
    async fn set_driver_availability(
        &self,
        user: User,
        id: Uuid,
        available: bool,
    ) -> Result<Driver, Error> {
        self.update_driver(&user, &id, |driver| driver.set_availability(available))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn update_driver_location(
        &self,
        user: User,
        id: Uuid,
        coordinates: Coordinates,
    ) -> Result<Driver, Error> {
        self.update_driver(&user, &id, |driver| driver.update_location(coordinates))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn update_driver_profile(
        &self,
        user: User,
        id: Uuid,
        profile: DriverProfile,
    ) -> Result<Driver, Error> {
        profile.validate()?;

        self.update_driver(&user, &id, |driver| {
            driver.update_profile(profile);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn deactivate_driver(&self, user: User, id: Uuid) -> Result<Driver, Error> {
        self.update_driver(&user, &id, |driver| driver.deactivate())
            .await
    }
}
