use axum::extract::{Extension, Json, Path, Query};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::db::Page;
use crate::entities::{NewRide, Payment, Ride, RideChanges, Trip};
use crate::error::Error;

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<NewRide>,
) -> Result<(StatusCode, Json<Ride>), Error> {
    let ride = api.create_ride(user, params).await?;

    Ok((StatusCode::CREATED, ride.into()))
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.find_ride(user, id).await?;

    Ok(ride.into())
}

pub async fn update(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(changes): Json<RideChanges>,
) -> Result<Json<Ride>, Error> {
    let ride = api.update_ride(user, id, changes).await?;

    Ok(ride.into())
}

pub async fn delete(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    api.delete_ride(user, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Ride>>, Error> {
    let rides = api.list_rides(user, page).await?;

    Ok(rides.into())
}

pub async fn list_by_driver(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(driver_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Ride>>, Error> {
    let rides = api.list_driver_rides(user, driver_id, page).await?;

    Ok(rides.into())
}

pub async fn finish(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, Error> {
    let payments = api.finish_ride(user, id).await?;

    Ok(payments.into())
}

pub async fn list_trips(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Trip>>, Error> {
    let trips = api.list_trips(user, id).await?;

    Ok(trips.into())
}
