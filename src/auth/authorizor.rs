use oso::{Oso, PolarClass};

use crate::auth::{Platform, User};
use crate::entities::{Booking, Driver};
use crate::error::Error;

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(Platform::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Driver::get_polar_class())?;
    o.register_class(Booking::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[cfg(test)]
fn booking_for(customer_id: uuid::Uuid) -> Booking {
    use crate::entities::{sample_registration, sample_request, Vehicle};
    use crate::fare::FarePolicy;

    let vehicle = Vehicle::new(sample_registration(), None);
    let fare = FarePolicy::default().quote(&vehicle, 10.0, true).unwrap();

    Booking::new(sample_request(customer_id, vehicle.id), 10.0, fare)
}

#[test]
fn platform_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let customer = User::new(Uuid::new_v4(), &["customer"]);
    let admin = User::new(Uuid::new_v4(), &["admin"]);
    let system = User::new_system_user();

    let result = authorizor.query_rule("has_role", (system.clone(), "system", Platform::default()));
    assert!(result.unwrap().next().unwrap().is_ok());

    let allowed = |user: &User, action: &str| {
        authorizor
            .is_allowed(user.clone(), action.to_string(), Platform::default())
            .unwrap()
    };

    assert!(allowed(&customer, "create_booking"));
    assert!(allowed(&customer, "quote_fare"));
    assert!(!allowed(&customer, "register_vehicle"));
    assert!(!allowed(&customer, "expire_pending"));

    assert!(allowed(&admin, "register_vehicle"));
    assert!(allowed(&admin, "list_drivers"));

    assert!(allowed(&system, "expire_pending"));
    assert!(!allowed(&system, "create_booking"));
}

#[test]
fn booking_customer_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let customer = User::new(Uuid::new_v4(), &["customer"]);
    let stranger = User::new(Uuid::new_v4(), &["customer"]);
    let booking = booking_for(customer.id);

    let result = authorizor.query_rule("has_role", (customer.clone(), "customer", booking.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    for action in ["read", "cancel", "retry"] {
        let result = authorizor.is_allowed(customer.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), true, "{}", action);

        let result = authorizor.is_allowed(stranger.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), false, "{}", action);
    }

    for action in ["start", "complete", "accept", "assign"] {
        let result = authorizor.is_allowed(customer.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), false, "{}", action);
    }
}

#[test]
fn booking_driver_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::new(Uuid::new_v4(), &["driver"]);
    let mut booking = booking_for(Uuid::new_v4());

    // before the driver is assigned

    let result = authorizor.query_rule("has_role", (driver.clone(), "driver", booking.clone()));
    assert!(result.unwrap().next().is_none());

    let result = authorizor.is_allowed(driver.clone(), "start", booking.clone());
    assert_eq!(result.unwrap(), false);

    let car_id = booking.requested_car_id;
    booking.assign(driver.id, car_id, "".into()).unwrap();

    // after the driver is assigned

    for action in ["read", "accept", "start", "complete"] {
        let result = authorizor.is_allowed(driver.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), true, "{}", action);
    }

    let result = authorizor.is_allowed(driver.clone(), "cancel", booking.clone());
    assert_eq!(result.unwrap(), false);

    let other_driver = User::new(Uuid::new_v4(), &["driver"]);
    let result = authorizor.is_allowed(other_driver, "start", booking.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn booking_admin_and_system_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let admin = User::new(Uuid::new_v4(), &["admin"]);
    let system = User::new_system_user();
    let booking = booking_for(Uuid::new_v4());

    for action in ["read", "assign", "retry", "cancel"] {
        let result = authorizor.is_allowed(admin.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), true, "{}", action);
    }

    let result = authorizor.is_allowed(admin.clone(), "start", booking.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(system.clone(), "assign", booking.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(system.clone(), "cancel", booking.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn driver_owner_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let owner = User::new(Uuid::new_v4(), &["driver"]);
    let other = User::new(Uuid::new_v4(), &["driver"]);
    let admin = User::new(Uuid::new_v4(), &["admin"]);
    let driver = Driver::new(owner.id, "Nimal".into(), "0771234567".into(), None);

    let result = authorizor.is_allowed(owner.clone(), "update", driver.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(other.clone(), "read", driver.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(admin.clone(), "update", driver.clone());
    assert_eq!(result.unwrap(), true);
}
