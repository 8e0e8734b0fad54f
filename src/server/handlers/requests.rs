use axum::extract::{Extension, Json, Path, Query};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::db::Page;
use crate::entities::{Request, Trip};
use crate::error::Error;

#[derive(Serialize, Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    comment: Option<String>,
}

pub async fn submit(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
    Json(params): Json<SubmitParams>,
) -> Result<(StatusCode, Json<Request>), Error> {
    let request = api.submit_request(user, ride_id, params.comment).await?;

    Ok((StatusCode::CREATED, request.into()))
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Request>, Error> {
    let request = api.find_request(user, id).await?;

    Ok(request.into())
}

/// `null` when the caller has not asked to join the ride.
pub async fn find_own(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<Option<Request>>, Error> {
    let request = api.find_own_request(user, ride_id).await?;

    Ok(request.into())
}

pub async fn approve(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, Error> {
    let trip = api.approve_request(user, id).await?;

    Ok(trip.into())
}

pub async fn reject(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Request>, Error> {
    let request = api.reject_request(user, id).await?;

    Ok(request.into())
}

pub async fn list_received(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Request>>, Error> {
    let requests = api.list_received_requests(user, page).await?;

    Ok(requests.into())
}

pub async fn list_sent(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Request>>, Error> {
    let requests = api.list_sent_requests(user, page).await?;

    Ok(requests.into())
}
