mod payment;
mod request;
mod ride;
mod trip;

pub use payment::{Payment, Status as PaymentStatus};
pub use request::{Request, Status as RequestStatus};
pub use ride::{max_price_per_distance, NewRide, Ride, RideChanges, Status as RideStatus};
pub use trip::Trip;

#[cfg(test)]
pub use ride::new_ride_params;
