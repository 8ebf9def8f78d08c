use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::VehicleAPI,
    auth::{Platform, User},
    db::ChangeSet,
    entities::{Vehicle, VehicleRegistration},
    error::{not_found_error, Error},
};

#[async_trait]
impl VehicleAPI for Engine {
    /// Adds a fleet car. Drivers' own cars are registered along with the
    /// driver.
    #[tracing::instrument(skip(self))]
    async fn register_vehicle(
        &self,
        user: User,
        registration: VehicleRegistration,
    ) -> Result<Vehicle, Error> {
        self.authorize(user.clone(), "register_vehicle", Platform::default())?;

        registration.validate()?;

        let vehicle = Vehicle::new(registration, None);

        self.pool.register_vehicle(vehicle.clone()).await?;

        if let Err(err) = self
            .store
            .commit(ChangeSet::default().vehicle(Some(vehicle.clone())))
            .await
        {
            self.pool.unregister_vehicle(&vehicle.id).await;
            return Err(err);
        }

        Ok(vehicle)
    }

    #[tracing::instrument(skip(self))]
    async fn find_vehicle(&self, user: User, id: Uuid) -> Result<Vehicle, Error> {
        self.authorize(user.clone(), "list_vehicles", Platform::default())?;

        self.pool.vehicle(&id).await.ok_or_else(not_found_error)
    }

    #[tracing::instrument(skip(self))]
    async fn list_vehicles(&self, user: User) -> Result<Vec<Vehicle>, Error> {
        self.authorize(user.clone(), "list_vehicles", Platform::default())?;

        Ok(self.pool.vehicles().await)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::super::Settings;
    use super::*;

    use rust_decimal::Decimal;

    use crate::db::Store;
    use crate::entities::sample_registration;

    #[tokio::test]
    async fn admin_registers_fleet_cars() {
        let harness = Harness::new(Settings::default()).await;
        let customer = harness.customer();

        let err = harness
            .engine
            .register_vehicle(customer.clone(), sample_registration())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let vehicle = harness
            .engine
            .register_vehicle(harness.admin.clone(), sample_registration())
            .await
            .unwrap();
        assert!(vehicle.is_available());
        assert_eq!(vehicle.owner_driver_id, None);

        let found = harness
            .engine
            .find_vehicle(customer.clone(), vehicle.id)
            .await
            .unwrap();
        assert_eq!(found, vehicle);

        let listed = harness.engine.list_vehicles(customer).await.unwrap();
        assert_eq!(listed, vec![vehicle.clone()]);

        let stored = harness.store.load().await.unwrap();
        assert_eq!(stored.vehicles, vec![vehicle]);
    }

    #[tokio::test]
    async fn rejects_invalid_registration() {
        let harness = Harness::new(Settings::default()).await;

        let mut registration = sample_registration();
        registration.driver_rate = Decimal::new(-5, 0);

        let err = harness
            .engine
            .register_vehicle(harness.admin.clone(), registration)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        assert!(harness
            .engine
            .find_vehicle(harness.admin.clone(), Uuid::new_v4())
            .await
            .unwrap_err()
            .is_not_found_error());
    }

    #[tokio::test]
    async fn unpersisted_vehicle_is_not_listed() {
        let harness = Harness::new(Settings::default()).await;

        harness.store.fail_commits(true);

        let err = harness
            .engine
            .register_vehicle(harness.admin.clone(), sample_registration())
            .await
            .unwrap_err();
        assert!(err.is_internal());

        let listed = harness
            .engine
            .list_vehicles(harness.admin.clone())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
