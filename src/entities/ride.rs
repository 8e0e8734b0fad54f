use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_input_error, invalid_state_error, Error};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub title: String,
    pub source: String,
    pub destination: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub seats: i32,
    pub price_per_distance: Decimal,
    pub distance: Decimal,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub car_name: Option<String>,
    pub car_number: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Finished,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Finished => "finished".into(),
        }
    }
}

/// Parameters a driver supplies when publishing a ride.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewRide {
    pub source: String,
    pub destination: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub seats: i32,
    pub price_per_distance: Decimal,
    pub distance: Decimal,
    #[serde(default)]
    pub car_name: Option<String>,
    #[serde(default)]
    pub car_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update of a pending ride. The seat count and creation time are fixed
/// once a ride is published.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RideChanges {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub price_per_distance: Option<Decimal>,
    pub distance: Option<Decimal>,
    pub car_name: Option<String>,
    pub car_number: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

// distance is stored with one decimal place and at most five digits
fn max_distance() -> Decimal {
    Decimal::new(99999, 1)
}

/// Prices are whole-number sized; the bound keeps every fare representable.
pub fn max_price_per_distance() -> Decimal {
    Decimal::from(i32::MAX)
}

fn title(source: &str, destination: &str) -> String {
    format!("{} to {}", source, destination)
}

impl Ride {
    pub fn new(driver_id: Uuid, params: NewRide) -> Result<Self, Error> {
        let ride = Self {
            id: Uuid::new_v4(),
            driver_id,
            title: title(&params.source, &params.destination),
            source: params.source,
            destination: params.destination,
            start_time: params.start_time,
            end_time: params.end_time,
            seats: params.seats,
            price_per_distance: params.price_per_distance,
            distance: params.distance.round_dp(1),
            status: Status::Pending,
            created_at: Utc::now(),
            is_active: true,
            car_name: params.car_name,
            car_number: params.car_number,
            description: params.description,
        };

        ride.validate()?;

        Ok(ride)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.seats < 1 {
            tracing::info!("ride must offer at least one seat");
            return Err(invalid_input_error());
        }

        if self.price_per_distance.is_sign_negative()
            || self.price_per_distance > max_price_per_distance()
        {
            tracing::info!("price per distance unit out of range");
            return Err(invalid_input_error());
        }

        if self.distance.is_sign_negative() || self.distance > max_distance() {
            tracing::info!("distance out of range");
            return Err(invalid_input_error());
        }

        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status == Status::Finished
    }

    /// Amount owed by each rider once the ride is finished.
    pub fn fare(&self) -> Result<Decimal, Error> {
        self.price_per_distance
            .checked_mul(self.distance)
            .ok_or_else(|| {
                tracing::info!("fare of ride {} overflows", self.id);
                invalid_input_error()
            })
    }

    #[tracing::instrument(skip(changes))]
    pub fn apply(&mut self, changes: RideChanges) -> Result<(), Error> {
        if self.is_finished() {
            return Err(invalid_state_error());
        }

        let mut updated = self.clone();

        if let Some(source) = changes.source {
            updated.source = source;
        }
        if let Some(destination) = changes.destination {
            updated.destination = destination;
        }
        if let Some(start_time) = changes.start_time {
            updated.start_time = start_time;
        }
        if let Some(end_time) = changes.end_time {
            updated.end_time = end_time;
        }
        if let Some(price_per_distance) = changes.price_per_distance {
            updated.price_per_distance = price_per_distance;
        }
        if let Some(distance) = changes.distance {
            updated.distance = distance.round_dp(1);
        }
        if changes.car_name.is_some() {
            updated.car_name = changes.car_name;
        }
        if changes.car_number.is_some() {
            updated.car_number = changes.car_number;
        }
        if changes.description.is_some() {
            updated.description = changes.description;
        }
        if let Some(is_active) = changes.is_active {
            updated.is_active = is_active;
        }

        updated.title = title(&updated.source, &updated.destination);
        updated.validate()?;

        *self = updated;

        Ok(())
    }

    #[tracing::instrument]
    pub fn finish(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Finished;
                Ok(())
            }
            Status::Finished => Err(invalid_state_error()),
        }
    }
}

impl PolarClass for Ride {
    fn get_polar_class_builder() -> oso::ClassBuilder<Ride> {
        oso::Class::builder()
            .name("Ride")
            .add_attribute_getter("id", |recv: &Ride| recv.id.to_string())
            .add_attribute_getter("driver_id", |recv: &Ride| recv.driver_id.to_string())
            .add_attribute_getter("status", |recv: &Ride| recv.status.name())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Ride::get_polar_class_builder();
        builder.build()
    }
}

#[cfg(test)]
pub fn new_ride_params(seats: i32) -> NewRide {
    use rust_decimal_macros::dec;

    NewRide {
        source: "Koramangala".into(),
        destination: "Whitefield".into(),
        start_time: Utc::now(),
        end_time: Utc::now(),
        seats,
        price_per_distance: dec!(10),
        distance: dec!(12.5),
        car_name: None,
        car_number: None,
        description: None,
    }
}

#[test]
fn new_ride_test() {
    use rust_decimal_macros::dec;

    let driver_id = Uuid::new_v4();
    let mut params = new_ride_params(3);
    params.distance = dec!(12.54);

    let ride = Ride::new(driver_id, params).unwrap();

    assert_eq!(ride.driver_id, driver_id);
    assert_eq!(ride.status, Status::Pending);
    assert!(ride.is_active);
    assert_eq!(ride.distance, dec!(12.5));
    assert_eq!(ride.title, "Koramangala to Whitefield");
    assert_eq!(ride.fare().unwrap(), dec!(125.0));
}

#[test]
fn new_ride_validation_test() {
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    let err = Ride::new(Uuid::new_v4(), new_ride_params(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut params = new_ride_params(2);
    params.price_per_distance = dec!(-1);
    let err = Ride::new(Uuid::new_v4(), params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut params = new_ride_params(2);
    params.distance = dec!(10000);
    let err = Ride::new(Uuid::new_v4(), params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut params = new_ride_params(2);
    params.distance = dec!(9999.9);
    assert!(Ride::new(Uuid::new_v4(), params).is_ok());

    let mut params = new_ride_params(2);
    params.price_per_distance = max_price_per_distance() + dec!(0.01);
    let err = Ride::new(Uuid::new_v4(), params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn fare_test() {
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    let mut params = new_ride_params(2);
    params.price_per_distance = max_price_per_distance();
    params.distance = dec!(9999.9);
    let ride = Ride::new(Uuid::new_v4(), params).unwrap();
    assert_eq!(ride.fare().unwrap(), dec!(21474621721635.3));

    // rides decoded from storage skip validation
    let mut ride = ride;
    ride.price_per_distance = Decimal::MAX;
    ride.distance = dec!(2);
    assert_eq!(ride.fare().unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn apply_changes_test() {
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    let mut ride = Ride::new(Uuid::new_v4(), new_ride_params(2)).unwrap();
    let created_at = ride.created_at;

    ride.apply(RideChanges {
        destination: Some("Indiranagar".into()),
        distance: Some(dec!(4.27)),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(ride.title, "Koramangala to Indiranagar");
    assert_eq!(ride.distance, dec!(4.3));
    assert_eq!(ride.seats, 2);
    assert_eq!(ride.created_at, created_at);

    // a rejected change leaves the ride untouched
    let err = ride
        .apply(RideChanges {
            source: Some("Hebbal".into()),
            price_per_distance: Some(dec!(-3)),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(ride.source, "Koramangala");

    ride.finish().unwrap();
    let err = ride.apply(RideChanges::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn finish_test() {
    use crate::error::ErrorKind;

    let mut ride = Ride::new(Uuid::new_v4(), new_ride_params(1)).unwrap();

    ride.finish().unwrap();
    assert!(ride.is_finished());

    let err = ride.finish().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
