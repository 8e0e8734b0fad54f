use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    db::Store,
    entities::Trip,
    error::{capacity_exceeded_error, invalid_state_error, Error},
};

/// Hands out seats on rides without overbooking.
///
/// Every mutation of a ride, its requests or its payments runs while holding
/// that ride's lock, so a check made under the lock still holds when the
/// write lands. Rides never contend with each other. A ride only has an entry
/// in the lock table while some task holds or waits for its lock.
#[derive(Default)]
pub struct SeatAllocator {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one ride. Releasing it drops the ride's lock table
/// entry once nobody else is waiting.
pub struct RideGuard<'a> {
    allocator: &'a SeatAllocator,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RideGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.allocator.prune();
    }
}

impl SeatAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, ride_id: Uuid) -> RideGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(ride_id).or_default().clone()
        };

        RideGuard {
            allocator: self,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Removes entries only the table itself still references. This also
    /// sweeps up entries left behind by waiters that were cancelled.
    fn prune(&self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Approves the request and books its requester onto the ride if a seat is
    /// left. Takes the ride lock for the whole check-and-insert.
    #[tracing::instrument(skip(self, store))]
    pub async fn try_create_trip(
        &self,
        store: &dyn Store,
        ride_id: Uuid,
        request_id: Uuid,
    ) -> Result<Trip, Error> {
        let _guard = self.lock(ride_id).await;

        // re-read everything under the lock, the caller's copies may be stale
        let mut request = store.fetch_request(request_id).await?;
        if request.ride_id != ride_id {
            tracing::info!("request belongs to another ride");
            return Err(invalid_state_error());
        }

        let ride = store.fetch_ride(ride_id).await?;
        if ride.is_finished() {
            tracing::info!("ride is finished, no more seats are handed out");
            return Err(invalid_state_error());
        }

        request.approve()?;

        let booked = store.count_trips(ride_id).await?;
        if booked >= i64::from(ride.seats) {
            tracing::info!(booked, seats = ride.seats, "ride is full");
            return Err(capacity_exceeded_error());
        }

        let trip = Trip::new(ride_id, request.requester_id);
        store.admit_trip(&request, &trip).await?;

        tracing::info!(trip_id = %trip.id, "seat booked");

        Ok(trip)
    }
}

#[cfg(test)]
use crate::{
    api::{RequestAPI, RideAPI, TripAPI},
    auth::User,
    engine::new_test_engine,
    entities::{new_ride_params, RequestStatus},
    error::ErrorKind,
};

#[tokio::test]
async fn locks_are_per_ride_test() {
    use std::time::Duration;
    use tokio::time::timeout;

    let allocator = SeatAllocator::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let _held = allocator.lock(a).await;

    let other = timeout(Duration::from_millis(100), allocator.lock(b)).await;
    assert!(other.is_ok());

    let same = timeout(Duration::from_millis(50), allocator.lock(a)).await;
    assert!(same.is_err());
}

#[tokio::test]
async fn released_locks_leave_the_table_test() {
    let allocator = SeatAllocator::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let held = allocator.lock(a).await;
    {
        let _other = allocator.lock(b).await;
        assert_eq!(allocator.tracked(), 2);
    }
    assert_eq!(allocator.tracked(), 1);

    drop(held);
    assert_eq!(allocator.tracked(), 0);

    // a lock with a queued waiter survives its first holder
    let held = allocator.lock(a).await;
    let waiter = allocator.lock(a);
    tokio::pin!(waiter);
    assert!(futures::poll!(waiter.as_mut()).is_pending());
    drop(held);
    assert_eq!(allocator.tracked(), 1);

    let second = waiter.await;
    drop(second);
    assert_eq!(allocator.tracked(), 0);
}

#[tokio::test]
async fn unknown_rides_never_enter_the_table_test() {
    use crate::entities::RideChanges;

    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());

    for _ in 0..1000 {
        let err = engine
            .update_ride(driver.clone(), Uuid::new_v4(), RideChanges::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    for _ in 0..10 {
        let err = engine
            .finish_ride(driver.clone(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine
            .delete_ride(driver.clone(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(engine.allocator.tracked(), 0);

    let ride = engine
        .create_ride(driver.clone(), new_ride_params(1))
        .await
        .unwrap();
    let rider = User::new(Uuid::new_v4());
    let request = engine.submit_request(rider, ride.id, None).await.unwrap();
    engine
        .approve_request(driver.clone(), request.id)
        .await
        .unwrap();
    engine.finish_ride(driver, ride.id).await.unwrap();

    assert_eq!(engine.allocator.tracked(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_approvals_never_oversell_test() {
    let engine = Arc::new(new_test_engine());
    let driver = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(3))
        .await
        .unwrap();

    let mut request_ids = vec![];
    for _ in 0..20 {
        let rider = User::new(Uuid::new_v4());
        let request = engine.submit_request(rider, ride.id, None).await.unwrap();
        request_ids.push(request.id);
    }

    let handles = request_ids.iter().map(|id| {
        let engine = engine.clone();
        let driver = driver.clone();
        let id = *id;
        tokio::spawn(async move { engine.approve_request(driver, id).await })
    });

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let booked = results.iter().filter(|result| result.is_ok()).count();
    let turned_away = results
        .iter()
        .filter(|result| matches!(result, Err(err) if err.kind() == ErrorKind::CapacityExceeded))
        .count();

    assert_eq!(booked, 3);
    assert_eq!(turned_away, 17);

    let trips = engine.list_trips(driver.clone(), ride.id).await.unwrap();
    assert_eq!(trips.len(), 3);

    // requests that lost the race stay pending
    let mut pending = 0;
    for id in request_ids {
        let request = engine.find_request(driver.clone(), id).await.unwrap();
        if request.status == RequestStatus::Pending {
            pending += 1;
        }
    }
    assert_eq!(pending, 17);
}

#[tokio::test]
async fn try_create_trip_rejects_resolved_request_test() {
    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let rider = User::new(Uuid::new_v4());
    let ride = engine
        .create_ride(driver.clone(), new_ride_params(2))
        .await
        .unwrap();
    let request = engine.submit_request(rider, ride.id, None).await.unwrap();

    let allocator = SeatAllocator::new();
    allocator
        .try_create_trip(engine.store.as_ref(), ride.id, request.id)
        .await
        .unwrap();

    let err = allocator
        .try_create_trip(engine.store.as_ref(), ride.id, request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = allocator
        .try_create_trip(engine.store.as_ref(), Uuid::new_v4(), request.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
