mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Payment, Request, Ride, Trip};
use crate::error::Error;

/// Durable storage for rides and everything hanging off them.
///
/// Single calls are atomic. Sequences of calls are not serialised by the store;
/// callers that need check-then-act semantics across calls hold the ride lock
/// from [`crate::engine::allocator::SeatAllocator`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error>;
    async fn fetch_ride(&self, id: Uuid) -> Result<Ride, Error>;
    async fn update_ride(&self, ride: &Ride) -> Result<(), Error>;

    /// Removes the ride together with its requests, trips and payments.
    async fn delete_ride(&self, id: Uuid) -> Result<(), Error>;
    async fn list_rides(&self, filter: RideFilter, page: Page) -> Result<Vec<Ride>, Error>;

    /// Fails with a unique constraint violation if the requester already asked
    /// to join the ride.
    async fn insert_request(&self, request: &Request) -> Result<(), Error>;
    async fn fetch_request(&self, id: Uuid) -> Result<Request, Error>;

    /// The request `requester_id` made to join the ride, if any.
    async fn fetch_request_by_requester(
        &self,
        ride_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Request, Error>;

    /// Writes a decided request. Fails with invalid state unless the stored
    /// request is still pending, so a request is decided at most once.
    async fn resolve_request(&self, request: &Request) -> Result<(), Error>;
    async fn list_requests(&self, filter: RequestFilter, page: Page)
        -> Result<Vec<Request>, Error>;

    async fn count_trips(&self, ride_id: Uuid) -> Result<i64, Error>;
    async fn list_trips(&self, ride_id: Uuid) -> Result<Vec<Trip>, Error>;

    /// Inserts `trip` and writes the approved `request` as one unit. Ride
    /// status, request status and seat count are re-checked inside the unit:
    /// a finished ride or an already decided request fails with invalid
    /// state, a full ride with capacity exceeded, and nothing is written.
    async fn admit_trip(&self, request: &Request, trip: &Trip) -> Result<(), Error>;

    /// Inserts every payment and writes the finished `ride` as one unit. If the
    /// stored ride is already finished (invalid state) or any rider was
    /// already billed for it (unique constraint violation) nothing is written.
    async fn settle_ride(&self, ride: &Ride, payments: &[Payment]) -> Result<(), Error>;

    async fn fetch_payment(&self, id: Uuid) -> Result<Payment, Error>;
    async fn update_payment(&self, payment: &Payment) -> Result<(), Error>;
    async fn list_payments(&self, filter: PaymentFilter, page: Page)
        -> Result<Vec<Payment>, Error>;
}

#[derive(Clone, Copy, Debug)]
pub enum RideFilter {
    Active,
    Driver(Uuid),
}

#[derive(Clone, Copy, Debug)]
pub enum RequestFilter {
    Ride(Uuid),
    Requester(Uuid),
    /// requests on rides driven by the given user
    Driver(Uuid),
}

#[derive(Clone, Copy, Debug)]
pub enum PaymentFilter {
    Ride(Uuid),
    Rider(Uuid),
    Driver(Uuid),
}

/// 1-based page of a newest-first listing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 5,
        }
    }
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    pub fn limit(&self) -> usize {
        self.per_page.clamp(1, 100) as usize
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }
}

#[test]
fn page_test() {
    let page = Page::default();
    assert_eq!(page.limit(), 5);
    assert_eq!(page.offset(), 0);

    let page = Page::new(3, 10);
    assert_eq!(page.offset(), 20);

    let page = Page::new(0, 0);
    assert_eq!(page.limit(), 1);
    assert_eq!(page.offset(), 0);

    let page = Page::new(2, 1000);
    assert_eq!(page.limit(), 100);
    assert_eq!(page.offset(), 100);
}
