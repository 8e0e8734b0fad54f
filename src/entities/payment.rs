use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Ride, Trip};
use crate::error::{invalid_state_error, Error};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Uuid,
    pub amount: Decimal,
    pub status: Status,
    pub generated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Paid,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Paid => "paid".into(),
        }
    }
}

impl Payment {
    /// Bills the rider of `trip` for the full fare of `ride`.
    pub fn new(ride: &Ride, trip: &Trip) -> Result<Self, Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            rider_id: trip.rider_id,
            driver_id: ride.driver_id,
            amount: ride.fare()?,
            status: Status::Pending,
            generated_at: Utc::now(),
            paid_at: None,
        })
    }

    #[tracing::instrument]
    pub fn pay(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Paid;
                self.paid_at = Some(Utc::now());
                Ok(())
            }
            Status::Paid => Err(invalid_state_error()),
        }
    }
}

impl PolarClass for Payment {
    fn get_polar_class_builder() -> oso::ClassBuilder<Payment> {
        oso::Class::builder()
            .name("Payment")
            .add_attribute_getter("id", |recv: &Payment| recv.id.to_string())
            .add_attribute_getter("rider_id", |recv: &Payment| recv.rider_id.to_string())
            .add_attribute_getter("driver_id", |recv: &Payment| recv.driver_id.to_string())
            .add_attribute_getter("status", |recv: &Payment| recv.status.name())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Payment::get_polar_class_builder();
        builder.build()
    }
}

#[test]
fn payment_test() {
    use crate::entities::new_ride_params;
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    let ride = Ride::new(Uuid::new_v4(), new_ride_params(2)).unwrap();
    let trip = Trip::new(ride.id, Uuid::new_v4());

    let mut payment = Payment::new(&ride, &trip).unwrap();

    assert_eq!(payment.amount, dec!(125));
    assert_eq!(payment.rider_id, trip.rider_id);
    assert_eq!(payment.driver_id, ride.driver_id);
    assert_eq!(payment.status, Status::Pending);

    payment.pay().unwrap();
    assert_eq!(payment.status, Status::Paid);
    assert!(payment.paid_at.is_some());

    assert_eq!(payment.pay().unwrap_err().kind(), ErrorKind::InvalidState);
}
