use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Page, PaymentFilter, RequestFilter, RideFilter, Store};
use crate::entities::{Payment, Request, Ride, Trip};
use crate::error::{
    capacity_exceeded_error, invalid_state_error, not_found_error,
    unique_constraint_violation_error, Error,
};

#[derive(Default)]
struct Tables {
    rides: HashMap<Uuid, Ride>,
    requests: HashMap<Uuid, Request>,
    trips: HashMap<Uuid, Trip>,
    payments: HashMap<Uuid, Payment>,
}

impl Tables {
    fn has_request(&self, ride_id: Uuid, requester_id: Uuid) -> bool {
        self.requests
            .values()
            .any(|r| r.ride_id == ride_id && r.requester_id == requester_id)
    }

    fn has_trip(&self, ride_id: Uuid, rider_id: Uuid) -> bool {
        self.trips
            .values()
            .any(|t| t.ride_id == ride_id && t.rider_id == rider_id)
    }

    fn has_payment(&self, ride_id: Uuid, rider_id: Uuid) -> bool {
        self.payments
            .values()
            .any(|p| p.ride_id == ride_id && p.rider_id == rider_id)
    }

    fn trip_count(&self, ride_id: Uuid) -> i64 {
        self.trips.values().filter(|t| t.ride_id == ride_id).count() as i64
    }

    fn drives(&self, ride_id: Uuid, driver_id: Uuid) -> bool {
        self.rides
            .get(&ride_id)
            .map_or(false, |ride| ride.driver_id == driver_id)
    }
}

fn paginate<T>(rows: Vec<T>, page: Page) -> Vec<T> {
    rows.into_iter()
        .skip(page.offset())
        .take(page.limit())
        .collect()
}

/// Keeps every table behind one lock, which makes each call trivially atomic.
/// Used by the tests, the simulation and deployments without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        if tables.rides.contains_key(&ride.id) {
            return Err(unique_constraint_violation_error());
        }

        tables.rides.insert(ride.id, ride.clone());

        Ok(())
    }

    async fn fetch_ride(&self, id: Uuid) -> Result<Ride, Error> {
        let tables = self.tables.lock().await;

        tables.rides.get(&id).cloned().ok_or_else(not_found_error)
    }

    async fn update_ride(&self, ride: &Ride) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        let stored = tables.rides.get_mut(&ride.id).ok_or_else(not_found_error)?;
        *stored = ride.clone();

        Ok(())
    }

    async fn delete_ride(&self, id: Uuid) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        tables.rides.remove(&id).ok_or_else(not_found_error)?;
        tables.requests.retain(|_, r| r.ride_id != id);
        tables.trips.retain(|_, t| t.ride_id != id);
        tables.payments.retain(|_, p| p.ride_id != id);

        Ok(())
    }

    async fn list_rides(&self, filter: RideFilter, page: Page) -> Result<Vec<Ride>, Error> {
        let tables = self.tables.lock().await;

        let mut rides: Vec<Ride> = tables
            .rides
            .values()
            .filter(|ride| match filter {
                RideFilter::Active => ride.is_active,
                RideFilter::Driver(driver_id) => ride.driver_id == driver_id,
            })
            .cloned()
            .collect();
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(paginate(rides, page))
    }

    async fn insert_request(&self, request: &Request) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        if !tables.rides.contains_key(&request.ride_id) {
            return Err(not_found_error());
        }

        if tables.requests.contains_key(&request.id)
            || tables.has_request(request.ride_id, request.requester_id)
        {
            return Err(unique_constraint_violation_error());
        }

        tables.requests.insert(request.id, request.clone());

        Ok(())
    }

    async fn fetch_request(&self, id: Uuid) -> Result<Request, Error> {
        let tables = self.tables.lock().await;

        tables.requests.get(&id).cloned().ok_or_else(not_found_error)
    }

    async fn fetch_request_by_requester(
        &self,
        ride_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Request, Error> {
        let tables = self.tables.lock().await;

        tables
            .requests
            .values()
            .find(|r| r.ride_id == ride_id && r.requester_id == requester_id)
            .cloned()
            .ok_or_else(not_found_error)
    }

    async fn resolve_request(&self, request: &Request) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        let stored = tables
            .requests
            .get_mut(&request.id)
            .ok_or_else(not_found_error)?;
        if !stored.is_pending() {
            return Err(invalid_state_error());
        }
        *stored = request.clone();

        Ok(())
    }

    async fn list_requests(
        &self,
        filter: RequestFilter,
        page: Page,
    ) -> Result<Vec<Request>, Error> {
        let tables = self.tables.lock().await;

        let mut requests: Vec<Request> = tables
            .requests
            .values()
            .filter(|request| match filter {
                RequestFilter::Ride(ride_id) => request.ride_id == ride_id,
                RequestFilter::Requester(requester_id) => request.requester_id == requester_id,
                RequestFilter::Driver(driver_id) => tables.drives(request.ride_id, driver_id),
            })
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(paginate(requests, page))
    }

    async fn count_trips(&self, ride_id: Uuid) -> Result<i64, Error> {
        let tables = self.tables.lock().await;

        Ok(tables.trip_count(ride_id))
    }

    async fn list_trips(&self, ride_id: Uuid) -> Result<Vec<Trip>, Error> {
        let tables = self.tables.lock().await;

        let mut trips: Vec<Trip> = tables
            .trips
            .values()
            .filter(|t| t.ride_id == ride_id)
            .cloned()
            .collect();
        trips.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(trips)
    }

    async fn admit_trip(&self, request: &Request, trip: &Trip) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        let ride = tables.rides.get(&trip.ride_id).ok_or_else(not_found_error)?;
        if ride.is_finished() {
            return Err(invalid_state_error());
        }
        let seats = i64::from(ride.seats);

        let stored = tables.requests.get(&request.id).ok_or_else(not_found_error)?;
        if !stored.is_pending() {
            return Err(invalid_state_error());
        }

        if tables.has_trip(trip.ride_id, trip.rider_id) {
            return Err(unique_constraint_violation_error());
        }

        if tables.trip_count(trip.ride_id) >= seats {
            return Err(capacity_exceeded_error());
        }

        tables.trips.insert(trip.id, trip.clone());
        tables.requests.insert(request.id, request.clone());

        Ok(())
    }

    async fn settle_ride(&self, ride: &Ride, payments: &[Payment]) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        let stored = tables.rides.get(&ride.id).ok_or_else(not_found_error)?;
        if stored.is_finished() {
            return Err(invalid_state_error());
        }

        for (i, payment) in payments.iter().enumerate() {
            let billed_twice = payments[..i].iter().any(|p| p.rider_id == payment.rider_id);

            if billed_twice || tables.has_payment(payment.ride_id, payment.rider_id) {
                return Err(unique_constraint_violation_error());
            }
        }

        for payment in payments {
            tables.payments.insert(payment.id, payment.clone());
        }
        tables.rides.insert(ride.id, ride.clone());

        Ok(())
    }

    async fn fetch_payment(&self, id: Uuid) -> Result<Payment, Error> {
        let tables = self.tables.lock().await;

        tables.payments.get(&id).cloned().ok_or_else(not_found_error)
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;

        let stored = tables
            .payments
            .get_mut(&payment.id)
            .ok_or_else(not_found_error)?;
        *stored = payment.clone();

        Ok(())
    }

    async fn list_payments(
        &self,
        filter: PaymentFilter,
        page: Page,
    ) -> Result<Vec<Payment>, Error> {
        let tables = self.tables.lock().await;

        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|payment| match filter {
                PaymentFilter::Ride(ride_id) => payment.ride_id == ride_id,
                PaymentFilter::Rider(rider_id) => payment.rider_id == rider_id,
                PaymentFilter::Driver(driver_id) => payment.driver_id == driver_id,
            })
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));

        Ok(paginate(payments, page))
    }
}

#[cfg(test)]
async fn store_with_ride(seats: i32) -> (MemoryStore, Ride) {
    use crate::entities::new_ride_params;

    let store = MemoryStore::new();
    let ride = Ride::new(Uuid::new_v4(), new_ride_params(seats)).unwrap();
    store.insert_ride(&ride).await.unwrap();

    (store, ride)
}

#[tokio::test]
async fn request_uniqueness_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(2).await;
    let requester_id = Uuid::new_v4();

    store
        .insert_request(&Request::new(ride.id, requester_id, None))
        .await
        .unwrap();

    let err = store
        .insert_request(&Request::new(ride.id, requester_id, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);

    let err = store
        .insert_request(&Request::new(Uuid::new_v4(), requester_id, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn fetch_missing_test() {
    use crate::error::ErrorKind;

    let store = MemoryStore::new();

    let err = store.fetch_ride(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store.fetch_request(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store.fetch_payment(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn admit_trip_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(1).await;

    let mut first = Request::new(ride.id, Uuid::new_v4(), None);
    let second = Request::new(ride.id, Uuid::new_v4(), None);
    store.insert_request(&first).await.unwrap();
    store.insert_request(&second).await.unwrap();

    first.approve().unwrap();
    store
        .admit_trip(&first, &Trip::new(ride.id, first.requester_id))
        .await
        .unwrap();

    assert_eq!(store.count_trips(ride.id).await.unwrap(), 1);
    assert!(!store.fetch_request(first.id).await.unwrap().is_pending());

    // the stored request is already approved
    let err = store
        .admit_trip(&first, &Trip::new(ride.id, first.requester_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let mut approved = second.clone();
    approved.approve().unwrap();

    // same rider twice
    let err = store
        .admit_trip(&approved, &Trip::new(ride.id, first.requester_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);

    // ride is full, nothing is written
    let err = store
        .admit_trip(&approved, &Trip::new(ride.id, second.requester_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert!(store.fetch_request(second.id).await.unwrap().is_pending());
    assert_eq!(store.count_trips(ride.id).await.unwrap(), 1);
}

#[tokio::test]
async fn admit_trip_on_finished_ride_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(3).await;
    let mut request = Request::new(ride.id, Uuid::new_v4(), None);
    store.insert_request(&request).await.unwrap();

    let mut finished = ride.clone();
    finished.finish().unwrap();
    store.settle_ride(&finished, &[]).await.unwrap();

    request.approve().unwrap();
    let err = store
        .admit_trip(&request, &Trip::new(ride.id, request.requester_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(store.count_trips(ride.id).await.unwrap(), 0);
    assert!(store.fetch_request(request.id).await.unwrap().is_pending());
}

#[tokio::test]
async fn resolve_request_once_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(1).await;
    let request = Request::new(ride.id, Uuid::new_v4(), None);
    store.insert_request(&request).await.unwrap();

    // an approval lands first, a stale rejection must not overwrite it
    let mut approved = request.clone();
    approved.approve().unwrap();
    store
        .admit_trip(&approved, &Trip::new(ride.id, request.requester_id))
        .await
        .unwrap();

    let mut rejected = request.clone();
    rejected.reject().unwrap();
    let err = store.resolve_request(&rejected).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(
        store.fetch_request(request.id).await.unwrap().status,
        approved.status
    );

    let err = store
        .resolve_request(&Request::new(ride.id, Uuid::new_v4(), None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn fetch_request_by_requester_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(1).await;
    let request = Request::new(ride.id, Uuid::new_v4(), None);
    store.insert_request(&request).await.unwrap();

    let found = store
        .fetch_request_by_requester(ride.id, request.requester_id)
        .await
        .unwrap();
    assert_eq!(found.id, request.id);

    let err = store
        .fetch_request_by_requester(ride.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn settle_ride_is_all_or_nothing_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(2).await;
    let first = Trip::new(ride.id, Uuid::new_v4());
    let second = Trip::new(ride.id, Uuid::new_v4());

    let mut finished = ride.clone();
    finished.finish().unwrap();

    // the first rider is billed twice, so the second payment is not written either
    let payments = vec![
        Payment::new(&ride, &second).unwrap(),
        Payment::new(&ride, &first).unwrap(),
        Payment::new(&ride, &first).unwrap(),
    ];
    let err = store.settle_ride(&finished, &payments).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);
    assert!(!store.fetch_ride(ride.id).await.unwrap().is_finished());

    let payments = vec![
        Payment::new(&ride, &first).unwrap(),
        Payment::new(&ride, &second).unwrap(),
    ];
    store.settle_ride(&finished, &payments).await.unwrap();

    // settling a finished ride again writes nothing
    let err = store.settle_ride(&finished, &payments).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let stored = store
        .list_payments(PaymentFilter::Ride(ride.id), Page::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(store.fetch_ride(ride.id).await.unwrap().is_finished());
}

#[tokio::test]
async fn delete_ride_cascades_test() {
    use crate::error::ErrorKind;

    let (store, ride) = store_with_ride(2).await;
    let other = Ride::new(ride.driver_id, crate::entities::new_ride_params(1)).unwrap();
    store.insert_ride(&other).await.unwrap();

    let mut request = Request::new(ride.id, Uuid::new_v4(), None);
    store.insert_request(&request).await.unwrap();
    request.approve().unwrap();
    let trip = Trip::new(ride.id, request.requester_id);
    store.admit_trip(&request, &trip).await.unwrap();

    let mut finished = ride.clone();
    finished.finish().unwrap();
    let payment = Payment::new(&ride, &trip).unwrap();
    store.settle_ride(&finished, &[payment.clone()]).await.unwrap();

    let untouched = Request::new(other.id, Uuid::new_v4(), None);
    store.insert_request(&untouched).await.unwrap();

    store.delete_ride(ride.id).await.unwrap();

    assert_eq!(
        store.fetch_ride(ride.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        store.fetch_request(request.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        store.fetch_payment(payment.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(store.count_trips(ride.id).await.unwrap(), 0);
    assert!(store.fetch_request(untouched.id).await.is_ok());

    let err = store.delete_ride(ride.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn list_requests_by_driver_test() {
    let (store, ride) = store_with_ride(3).await;
    let other = Ride::new(Uuid::new_v4(), crate::entities::new_ride_params(3)).unwrap();
    store.insert_ride(&other).await.unwrap();

    for _ in 0..3 {
        store
            .insert_request(&Request::new(ride.id, Uuid::new_v4(), None))
            .await
            .unwrap();
    }
    store
        .insert_request(&Request::new(other.id, Uuid::new_v4(), None))
        .await
        .unwrap();

    let received = store
        .list_requests(RequestFilter::Driver(ride.driver_id), Page::default())
        .await
        .unwrap();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|r| r.ride_id == ride.id));

    let second_page = store
        .list_requests(RequestFilter::Driver(ride.driver_id), Page::new(2, 2))
        .await
        .unwrap();
    assert_eq!(second_page.len(), 1);
}
