use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{api::TripAPI, auth::User, entities::Trip, error::Error};

#[async_trait]
impl TripAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn list_trips(&self, user: User, ride_id: Uuid) -> Result<Vec<Trip>, Error> {
        let ride = self.store.fetch_ride(ride_id).await?;

        self.authorize(user, "read", ride)?;

        self.store.list_trips(ride_id).await
    }
}

#[cfg(test)]
use crate::{
    api::{RequestAPI, RideAPI},
    engine::new_test_engine,
    entities::new_ride_params,
};

#[tokio::test]
async fn list_trips_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(3))
        .await
        .unwrap();

    let mut riders = vec![];
    for _ in 0..2 {
        let rider = User::new(Uuid::new_v4());
        let request = engine
            .submit_request(rider.clone(), ride.id, None)
            .await
            .unwrap();
        engine
            .approve_request(driver.clone(), request.id)
            .await
            .unwrap();
        riders.push(rider.id);
    }

    let trips = engine.list_trips(driver, ride.id).await.unwrap();
    let mut booked: Vec<_> = trips.iter().map(|trip| trip.rider_id).collect();
    booked.sort();
    riders.sort();
    assert_eq!(booked, riders);
}
