use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::PaymentAPI,
    auth::User,
    db::{Page, PaymentFilter},
    entities::{Payment, Ride, Trip},
    error::Error,
};

/// One pending payment per confirmed rider, each for the full fare.
pub fn bill(ride: &Ride, trips: &[Trip]) -> Result<Vec<Payment>, Error> {
    trips.iter().map(|trip| Payment::new(ride, trip)).collect()
}

#[async_trait]
impl PaymentAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn find_payment(&self, user: User, id: Uuid) -> Result<Payment, Error> {
        let payment = self.store.fetch_payment(id).await?;

        self.authorize(user, "read", payment.clone())?;

        Ok(payment)
    }

    #[tracing::instrument(skip(self))]
    async fn pay_payment(&self, user: User, id: Uuid) -> Result<Payment, Error> {
        let payment = self.store.fetch_payment(id).await?;

        // it's safe to perform the authorization check without the ride lock,
        // rider and driver never change
        self.authorize(user, "pay", payment.clone())?;

        let _guard = self.allocator.lock(payment.ride_id).await;

        let mut payment = self.store.fetch_payment(id).await?;
        payment.pay()?;
        self.store.update_payment(&payment).await?;

        tracing::info!(amount = %payment.amount, "payment settled");

        Ok(payment)
    }

    #[tracing::instrument(skip(self))]
    async fn list_owed_payments(&self, user: User, page: Page) -> Result<Vec<Payment>, Error> {
        self.store
            .list_payments(PaymentFilter::Rider(user.id), page)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_received_payments(
        &self,
        user: User,
        page: Page,
    ) -> Result<Vec<Payment>, Error> {
        self.store
            .list_payments(PaymentFilter::Driver(user.id), page)
            .await
    }
}

#[cfg(test)]
use crate::{
    api::{RequestAPI, RideAPI},
    engine::new_test_engine,
    entities::{new_ride_params, PaymentStatus},
    error::ErrorKind,
};

#[test]
fn bill_test() {
    use rust_decimal_macros::dec;

    let ride = Ride::new(Uuid::new_v4(), new_ride_params(3)).unwrap();
    let trips = vec![
        Trip::new(ride.id, Uuid::new_v4()),
        Trip::new(ride.id, Uuid::new_v4()),
    ];

    let payments = bill(&ride, &trips).unwrap();
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0].rider_id, trips[0].rider_id);
    assert_eq!(payments[1].rider_id, trips[1].rider_id);
    assert!(payments.iter().all(|payment| payment.amount == dec!(125)));

    assert!(bill(&ride, &[]).unwrap().is_empty());
}

#[tokio::test]
async fn pay_once_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(1))
        .await
        .unwrap();
    let request = engine
        .submit_request(rider.clone(), ride.id, None)
        .await
        .unwrap();
    engine
        .approve_request(driver.clone(), request.id)
        .await
        .unwrap();
    let payments = engine.finish_ride(driver.clone(), ride.id).await.unwrap();
    let id = payments[0].id;

    let err = engine.pay_payment(driver.clone(), id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let paid = engine.pay_payment(rider.clone(), id).await.unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert!(paid.paid_at.is_some());

    let err = engine.pay_payment(rider.clone(), id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    // both parties can see it, nobody else
    engine.find_payment(driver, id).await.unwrap();
    let found = engine.find_payment(rider.clone(), id).await.unwrap();
    assert_eq!(found.status, PaymentStatus::Paid);

    let stranger = User::new(Uuid::new_v4());
    let err = engine.find_payment(stranger, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let owed = engine
        .list_owed_payments(rider, Page::default())
        .await
        .unwrap();
    assert_eq!(owed.len(), 1);
}
