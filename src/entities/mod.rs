mod booking;
mod driver;
mod location;
mod quote;
mod vehicle;

pub use booking::{Booking, BookingRequest, Released, Status, NO_DRIVER_MESSAGE};
pub use driver::{Driver, DriverProfile, DriverRegistration};
pub use location::Coordinates;
pub use quote::{Quote, QuoteRequest};
pub use vehicle::{Vehicle, VehicleRegistration};

#[cfg(test)]
pub use booking::sample_request;
#[cfg(test)]
pub use vehicle::sample_registration;
