use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::User;
use crate::db::Page;
use crate::entities::{NewRide, Payment, Request, Ride, RideChanges, Trip};
use crate::error::Error;

#[async_trait]
pub trait RideAPI {
    async fn create_ride(&self, user: User, params: NewRide) -> Result<Ride, Error>;
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error>;
    async fn update_ride(&self, user: User, id: Uuid, changes: RideChanges)
        -> Result<Ride, Error>;
    async fn delete_ride(&self, user: User, id: Uuid) -> Result<(), Error>;
    async fn list_rides(&self, user: User, page: Page) -> Result<Vec<Ride>, Error>;
    async fn list_driver_rides(
        &self,
        user: User,
        driver_id: Uuid,
        page: Page,
    ) -> Result<Vec<Ride>, Error>;
    async fn finish_ride(&self, user: User, id: Uuid) -> Result<Vec<Payment>, Error>;
}

#[async_trait]
pub trait RequestAPI {
    async fn submit_request(
        &self,
        user: User,
        ride_id: Uuid,
        comment: Option<String>,
    ) -> Result<Request, Error>;
    async fn find_request(&self, user: User, id: Uuid) -> Result<Request, Error>;
    /// The caller's own request on the ride, `None` if they never asked to join.
    async fn find_own_request(&self, user: User, ride_id: Uuid)
        -> Result<Option<Request>, Error>;
    async fn approve_request(&self, user: User, id: Uuid) -> Result<Trip, Error>;
    async fn reject_request(&self, user: User, id: Uuid) -> Result<Request, Error>;
    async fn list_received_requests(&self, user: User, page: Page)
        -> Result<Vec<Request>, Error>;
    async fn list_sent_requests(&self, user: User, page: Page) -> Result<Vec<Request>, Error>;
}

#[async_trait]
pub trait TripAPI {
    async fn list_trips(&self, user: User, ride_id: Uuid) -> Result<Vec<Trip>, Error>;
}

#[async_trait]
pub trait PaymentAPI {
    async fn find_payment(&self, user: User, id: Uuid) -> Result<Payment, Error>;
    async fn pay_payment(&self, user: User, id: Uuid) -> Result<Payment, Error>;
    async fn list_owed_payments(&self, user: User, page: Page) -> Result<Vec<Payment>, Error>;
    async fn list_received_payments(&self, user: User, page: Page)
        -> Result<Vec<Payment>, Error>;
}

pub trait API: RideAPI + RequestAPI + TripAPI + PaymentAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
