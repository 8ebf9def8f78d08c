use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::User;
use crate::entities::{
    Booking, BookingRequest, Coordinates, Driver, DriverProfile, DriverRegistration, Quote,
    QuoteRequest, Vehicle, VehicleRegistration,
};
use crate::error::Error;

#[async_trait]
pub trait BookingAPI {
    async fn create_booking(&self, user: User, request: BookingRequest) -> Result<Booking, Error>;

    async fn find_booking(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    /// Customers and drivers see their own bookings; admins see all of them.
    async fn list_bookings(&self, user: User) -> Result<Vec<Booking>, Error>;

    /// Runs assignment again for a PENDING booking, or reopens an UNASSIGNED
    /// one first.
    async fn assign_driver(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    async fn accept_booking(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    async fn start_booking(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    async fn complete_booking(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    async fn cancel_booking(&self, user: User, id: Uuid, reason: String)
        -> Result<Booking, Error>;

    /// Moves bookings that have waited for a driver too long to UNASSIGNED.
    async fn expire_pending(&self, user: User) -> Result<Vec<Booking>, Error>;
}

#[async_trait]
pub trait DriverAPI {
    async fn register_driver(
        &self,
        user: User,
        registration: DriverRegistration,
    ) -> Result<Driver, Error>;

    async fn find_driver(&self, user: User, id: Uuid) -> Result<Driver, Error>;

    async fn list_drivers(&self, user: User) -> Result<Vec<Driver>, Error>;

    async fn set_driver_availability(
        &self,
        user: User,
        id: Uuid,
        available: bool,
    ) -> Result<Driver, Error>;

    async fn update_driver_location(
        &self,
        user: User,
        id: Uuid,
        coordinates: Coordinates,
    ) -> Result<Driver, Error>;

    async fn update_driver_profile(
        &self,
        user: User,
        id: Uuid,
        profile: DriverProfile,
    ) -> Result<Driver, Error>;

    async fn deactivate_driver(&self, user: User, id: Uuid) -> Result<Driver, Error>;
}

#[async_trait]
pub trait VehicleAPI {
    async fn register_vehicle(
        &self,
        user: User,
        registration: VehicleRegistration,
    ) -> Result<Vehicle, Error>;

    async fn find_vehicle(&self, user: User, id: Uuid) -> Result<Vehicle, Error>;

    async fn list_vehicles(&self, user: User) -> Result<Vec<Vehicle>, Error>;
}

#[async_trait]
pub trait QuoteAPI {
    async fn quote_fare(&self, user: User, request: QuoteRequest) -> Result<Quote, Error>;
}

pub trait API: BookingAPI + DriverAPI + VehicleAPI + QuoteAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
