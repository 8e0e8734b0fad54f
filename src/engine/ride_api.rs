use super::{settlement, Engine};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::RideAPI,
    auth::User,
    db::{Page, RideFilter},
    entities::{NewRide, Payment, Ride, RideChanges},
    error::Error,
};

#[async_trait]
impl RideAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn create_ride(&self, user: User, params: NewRide) -> Result<Ride, Error> {
        let ride = Ride::new(user.id, params)?;

        self.store.insert_ride(&ride).await?;

        tracing::info!(ride_id = %ride.id, "ride published");

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let ride = self.store.fetch_ride(id).await?;

        self.authorize(user, "read", ride.clone())?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn update_ride(
        &self,
        user: User,
        id: Uuid,
        changes: RideChanges,
    ) -> Result<Ride, Error> {
        // unknown ids never reach the lock table
        let ride = self.store.fetch_ride(id).await?;
        self.authorize(user, "update", ride)?;

        let _guard = self.allocator.lock(id).await;

        let mut ride = self.store.fetch_ride(id).await?;
        ride.apply(changes)?;
        self.store.update_ride(&ride).await?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_ride(&self, user: User, id: Uuid) -> Result<(), Error> {
        let ride = self.store.fetch_ride(id).await?;
        self.authorize(user, "delete", ride)?;

        let _guard = self.allocator.lock(id).await;

        self.store.delete_ride(id).await?;

        tracing::info!(ride_id = %id, "ride deleted with its requests, trips and payments");

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_rides(&self, _user: User, page: Page) -> Result<Vec<Ride>, Error> {
        self.store.list_rides(RideFilter::Active, page).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_driver_rides(
        &self,
        _user: User,
        driver_id: Uuid,
        page: Page,
    ) -> Result<Vec<Ride>, Error> {
        self.store
            .list_rides(RideFilter::Driver(driver_id), page)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn finish_ride(&self, user: User, id: Uuid) -> Result<Vec<Payment>, Error> {
        let ride = self.store.fetch_ride(id).await?;
        self.authorize(user, "finish", ride)?;

        let _guard = self.allocator.lock(id).await;

        let mut ride = self.store.fetch_ride(id).await?;
        // a second finish fails here, before anyone is billed again
        ride.finish()?;

        let trips = self.store.list_trips(id).await?;
        let payments = settlement::bill(&ride, &trips)?;

        self.store.settle_ride(&ride, &payments).await?;

        tracing::info!(ride_id = %id, payments = payments.len(), "ride finished");

        Ok(payments)
    }
}

#[cfg(test)]
use crate::{
    api::{PaymentAPI, RequestAPI, TripAPI},
    engine::new_test_engine,
    entities::{new_ride_params, PaymentStatus, RideStatus},
    error::ErrorKind,
};
#[cfg(test)]
use rust_decimal_macros::dec;

#[tokio::test]
async fn create_and_find_ride_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());

    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();
    assert_eq!(ride.driver_id, driver.id);
    assert_eq!(ride.status, RideStatus::Pending);

    let stranger = User::new(Uuid::new_v4());
    let found = engine.find_ride(stranger, ride.id).await.unwrap();
    assert_eq!(found.id, ride.id);

    let err = engine
        .find_ride(driver, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn create_ride_validation_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());

    let err = engine
        .create_ride(driver, new_ride_params(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn update_ride_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();

    let changes = RideChanges {
        destination: Some("Indiranagar".into()),
        ..Default::default()
    };

    let stranger = User::new(Uuid::new_v4());
    let err = engine
        .update_ride(stranger, ride.id, changes.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let updated = engine
        .update_ride(driver.clone(), ride.id, changes.clone())
        .await
        .unwrap();
    assert_eq!(updated.title, "Koramangala to Indiranagar");
    assert_eq!(updated.seats, ride.seats);

    engine.finish_ride(driver.clone(), ride.id).await.unwrap();

    let err = engine
        .update_ride(driver, ride.id, changes)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn list_rides_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let other_driver = User::new(Uuid::new_v4());

    let first = engine
        .create_ride(driver.clone(), new_ride_params(1))
        .await
        .unwrap();
    engine
        .create_ride(other_driver.clone(), new_ride_params(1))
        .await
        .unwrap();

    let hidden = RideChanges {
        is_active: Some(false),
        ..Default::default()
    };
    engine
        .update_ride(driver.clone(), first.id, hidden)
        .await
        .unwrap();

    let active = engine
        .list_rides(driver.clone(), Page::default())
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].driver_id, other_driver.id);

    let own = engine
        .list_driver_rides(driver.clone(), driver.id, Page::default())
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].id, first.id);
}

#[tokio::test]
async fn finish_bills_every_rider_once_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();

    for _ in 0..2 {
        let rider = User::new(Uuid::new_v4());
        let request = engine.submit_request(rider, ride.id, None).await.unwrap();
        engine
            .approve_request(driver.clone(), request.id)
            .await
            .unwrap();
    }

    let payments = engine.finish_ride(driver.clone(), ride.id).await.unwrap();
    assert_eq!(payments.len(), 2);
    for payment in &payments {
        assert_eq!(payment.amount, dec!(125.0));
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.driver_id, driver.id);
    }

    let finished = engine.find_ride(driver.clone(), ride.id).await.unwrap();
    assert_eq!(finished.status, RideStatus::Finished);

    let err = engine
        .finish_ride(driver.clone(), ride.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let received = engine
        .list_received_payments(driver, Page::new(1, 10))
        .await
        .unwrap();
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn finish_at_highest_price_test() {
    use crate::entities::max_price_per_distance;

    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let mut params = new_ride_params(1);
    params.price_per_distance = max_price_per_distance();
    params.distance = dec!(9999.9);
    let ride = engine.create_ride(driver.clone(), params).await.unwrap();

    let rider = User::new(Uuid::new_v4());
    let request = engine.submit_request(rider, ride.id, None).await.unwrap();
    engine
        .approve_request(driver.clone(), request.id)
        .await
        .unwrap();

    let payments = engine.finish_ride(driver, ride.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, dec!(21474621721635.3));

    let mut params = new_ride_params(1);
    params.price_per_distance = max_price_per_distance() + dec!(1);
    let err = engine
        .create_ride(User::new(Uuid::new_v4()), params)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn finish_without_riders_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(4))
        .await
        .unwrap();

    let stranger = User::new(Uuid::new_v4());
    let err = engine.finish_ride(stranger, ride.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let payments = engine.finish_ride(driver, ride.id).await.unwrap();
    assert!(payments.is_empty());
}

#[tokio::test]
async fn delete_ride_cascades_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();
    let request = engine
        .submit_request(rider.clone(), ride.id, Some("two bags".into()))
        .await
        .unwrap();
    engine
        .approve_request(driver.clone(), request.id)
        .await
        .unwrap();
    let payments = engine.finish_ride(driver.clone(), ride.id).await.unwrap();

    let err = engine
        .delete_ride(rider.clone(), ride.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    engine.delete_ride(driver.clone(), ride.id).await.unwrap();

    let err = engine.find_ride(driver.clone(), ride.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine
        .find_request(rider.clone(), request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine
        .find_payment(rider.clone(), payments[0].id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine.list_trips(driver, ride.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let owed = engine
        .list_owed_payments(rider, Page::default())
        .await
        .unwrap();
    assert!(owed.is_empty());
}
