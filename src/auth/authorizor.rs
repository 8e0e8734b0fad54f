use oso::{Oso, PolarClass};

use crate::auth::User;
use crate::entities::{Payment, Request, Ride};
use crate::error::Error;

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(User::get_polar_class())?;
    o.register_class(Ride::get_polar_class())?;
    o.register_class(Request::get_polar_class())?;
    o.register_class(Payment::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[cfg(test)]
fn new_ride(driver: &User) -> Ride {
    use crate::entities::new_ride_params;

    Ride::new(driver.id.clone(), new_ride_params(2)).unwrap()
}

#[test]
fn ride_driver_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::new(Uuid::new_v4());
    let stranger = User::new(Uuid::new_v4());
    let ride = new_ride(&driver);

    for action in ["update", "delete", "finish", "resolve_request"] {
        let result = authorizor.is_allowed(driver.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), true);

        let result = authorizor.is_allowed(stranger.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), false);
    }

    let result = authorizor.is_allowed(stranger.clone(), "read", ride.clone());
    assert_eq!(result.unwrap(), true);
}

#[test]
fn ride_request_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let other = User::new(Uuid::new_v4());
    let ride = new_ride(&driver);

    let result = authorizor.is_allowed(driver.clone(), "request", ride.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(rider.clone(), "request", ride.clone());
    assert_eq!(result.unwrap(), true);

    let request = Request::new(ride.id.clone(), rider.id.clone(), None);

    let result = authorizor.is_allowed(rider.clone(), "read", request.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(other.clone(), "read", request.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn payment_rider_role_test() {
    use crate::entities::Trip;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let other = User::new(Uuid::new_v4());
    let ride = new_ride(&driver);
    let trip = Trip::new(ride.id.clone(), rider.id.clone());
    let payment = Payment::new(&ride, &trip).unwrap();

    let result = authorizor.is_allowed(rider.clone(), "pay", payment.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "pay", payment.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "read", payment.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(rider.clone(), "read", payment.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(other.clone(), "read", payment.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn system_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::new(Uuid::new_v4());
    let system = User::new_system_user();
    let ride = new_ride(&driver);

    for action in ["read", "update", "delete", "finish", "resolve_request", "request"] {
        let result = authorizor.is_allowed(system.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), true);
    }
}
