use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::RequestAPI,
    auth::User,
    db::{Page, RequestFilter},
    entities::{Request, Trip},
    error::{invalid_state_error, Error, ErrorKind},
};

#[async_trait]
impl RequestAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn submit_request(
        &self,
        user: User,
        ride_id: Uuid,
        comment: Option<String>,
    ) -> Result<Request, Error> {
        let ride = self.store.fetch_ride(ride_id).await?;
        self.authorize(user.clone(), "request", ride.clone())?;

        if ride.is_finished() || !ride.is_active {
            tracing::info!("ride is no longer taking requests");
            return Err(invalid_state_error());
        }

        let request = Request::new(ride.id, user.id, comment);

        // one request per rider and ride, the store enforces it
        self.store.insert_request(&request).await?;

        Ok(request)
    }

    #[tracing::instrument(skip(self))]
    async fn find_request(&self, user: User, id: Uuid) -> Result<Request, Error> {
        let request = self.store.fetch_request(id).await?;

        if !self.is_allowed(user.clone(), "read", request.clone())? {
            // the driver of the ride may read every request made on it
            let ride = self.store.fetch_ride(request.ride_id).await?;
            self.authorize(user, "resolve_request", ride)?;
        }

        Ok(request)
    }

    #[tracing::instrument(skip(self))]
    async fn find_own_request(
        &self,
        user: User,
        ride_id: Uuid,
    ) -> Result<Option<Request>, Error> {
        let ride = self.store.fetch_ride(ride_id).await?;
        self.authorize(user.clone(), "read", ride)?;

        match self.store.fetch_request_by_requester(ride_id, user.id).await {
            Ok(request) => Ok(Some(request)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn approve_request(&self, user: User, id: Uuid) -> Result<Trip, Error> {
        let request = self.store.fetch_request(id).await?;
        let ride = self.store.fetch_ride(request.ride_id).await?;

        self.authorize(user, "resolve_request", ride.clone())?;

        if !request.is_pending() {
            tracing::info!("request was already resolved, returning early...");
            return Err(invalid_state_error());
        }

        self.allocator
            .try_create_trip(self.store.as_ref(), ride.id, request.id)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn reject_request(&self, user: User, id: Uuid) -> Result<Request, Error> {
        let request = self.store.fetch_request(id).await?;
        let ride = self.store.fetch_ride(request.ride_id).await?;

        self.authorize(user, "resolve_request", ride.clone())?;

        let _guard = self.allocator.lock(ride.id).await;

        let mut request = self.store.fetch_request(id).await?;
        request.reject()?;
        self.store.resolve_request(&request).await?;

        Ok(request)
    }

    #[tracing::instrument(skip(self))]
    async fn list_received_requests(
        &self,
        user: User,
        page: Page,
    ) -> Result<Vec<Request>, Error> {
        self.store
            .list_requests(RequestFilter::Driver(user.id), page)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_sent_requests(&self, user: User, page: Page) -> Result<Vec<Request>, Error> {
        self.store
            .list_requests(RequestFilter::Requester(user.id), page)
            .await
    }
}

#[cfg(test)]
use crate::{
    api::{RideAPI, TripAPI},
    engine::new_test_engine,
    entities::{new_ride_params, RequestStatus, RideChanges},
};

#[tokio::test]
async fn submit_request_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();

    let request = engine
        .submit_request(rider.clone(), ride.id, Some("near the gate".into()))
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.requester_id, rider.id);

    let err = engine
        .submit_request(rider.clone(), ride.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);

    let err = engine
        .submit_request(driver.clone(), ride.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let err = engine
        .submit_request(rider, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn submit_request_to_closed_ride_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let hidden = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();
    let finished = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();

    let changes = RideChanges {
        is_active: Some(false),
        ..Default::default()
    };
    engine
        .update_ride(driver.clone(), hidden.id, changes)
        .await
        .unwrap();
    engine.finish_ride(driver, finished.id).await.unwrap();

    let rider = User::new(Uuid::new_v4());
    for ride_id in [hidden.id, finished.id] {
        let err = engine
            .submit_request(rider.clone(), ride_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}

#[tokio::test]
async fn approve_until_full_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();

    let mut requests = vec![];
    for _ in 0..3 {
        let rider = User::new(Uuid::new_v4());
        requests.push(engine.submit_request(rider, ride.id, None).await.unwrap());
    }

    let first = engine
        .approve_request(driver.clone(), requests[0].id)
        .await
        .unwrap();
    assert_eq!(first.rider_id, requests[0].requester_id);
    engine
        .approve_request(driver.clone(), requests[1].id)
        .await
        .unwrap();

    let err = engine
        .approve_request(driver.clone(), requests[2].id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

    let third = engine
        .find_request(driver.clone(), requests[2].id)
        .await
        .unwrap();
    assert_eq!(third.status, RequestStatus::Pending);

    // approving twice is a state error, not a second seat
    let err = engine
        .approve_request(driver.clone(), requests[0].id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let trips = engine.list_trips(driver, ride.id).await.unwrap();
    assert_eq!(trips.len(), 2);
}

#[tokio::test]
async fn reject_request_test() {
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

    let err = engine
        .reject_request(rider.clone(), request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let rejected = engine
        .reject_request(driver.clone(), request.id)
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);

    let err = engine
        .approve_request(driver.clone(), request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = engine
        .reject_request(driver.clone(), request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let trips = engine.list_trips(rider, ride.id).await.unwrap();
    assert!(trips.is_empty());
}

#[tokio::test]
async fn approve_after_finish_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();
    let request = engine.submit_request(rider, ride.id, None).await.unwrap();

    engine.finish_ride(driver.clone(), ride.id).await.unwrap();

    let err = engine
        .approve_request(driver, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn find_and_list_requests_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let stranger = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();
    let request = engine
        .submit_request(rider.clone(), ride.id, None)
        .await
        .unwrap();

    engine.find_request(rider.clone(), request.id).await.unwrap();
    engine
        .find_request(driver.clone(), request.id)
        .await
        .unwrap();

    let err = engine
        .find_request(stranger.clone(), request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let sent = engine
        .list_sent_requests(rider.clone(), Page::default())
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);

    let received = engine
        .list_received_requests(driver, Page::default())
        .await
        .unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, request.id);

    let received = engine
        .list_received_requests(rider, Page::default())
        .await
        .unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn find_own_request_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();

    let own = engine
        .find_own_request(rider.clone(), ride.id)
        .await
        .unwrap();
    assert!(own.is_none());

    let request = engine
        .submit_request(rider.clone(), ride.id, None)
        .await
        .unwrap();

    let own = engine
        .find_own_request(rider.clone(), ride.id)
        .await
        .unwrap();
    assert_eq!(own.map(|own| own.id), Some(request.id));

    // the driver never requested their own ride
    let own = engine.find_own_request(driver, ride.id).await.unwrap();
    assert!(own.is_none());

    let err = engine
        .find_own_request(rider, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
