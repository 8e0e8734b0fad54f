mod handlers;

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequest, RequestParts},
    routing::{get, patch, post},
    Router,
};
use uuid::Uuid;

use crate::server::handlers::{payments, requests, rides};
use crate::{
    api::DynAPI,
    auth::User,
    error::{unauthorized_error, unexpected_error, Error},
};

/// Header carrying the id of the authenticated caller, set by the gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

#[async_trait]
impl<B: Send> FromRequest<B> for User {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let id = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or_else(|| {
                tracing::info!("missing or malformed {} header", USER_ID_HEADER);
                unauthorized_error()
            })?;

        Ok(User::new(id))
    }
}

pub fn router(api: DynAPI) -> Router {
    Router::new()
        .route("/rides", post(rides::create).get(rides::list))
        .route(
            "/rides/:id",
            get(rides::find).patch(rides::update).delete(rides::delete),
        )
        .route("/rides/:id/finish", patch(rides::finish))
        .route("/rides/:id/trips", get(rides::list_trips))
        .route("/rides/:id/requests", post(requests::submit))
        .route("/rides/:id/requests/mine", get(requests::find_own))
        .route("/drivers/:id/rides", get(rides::list_by_driver))
        .route("/requests/:id", get(requests::find))
        .route("/requests/:id/approve", patch(requests::approve))
        .route("/requests/:id/reject", patch(requests::reject))
        .route("/me/requests/received", get(requests::list_received))
        .route("/me/requests/sent", get(requests::list_sent))
        .route("/payments/:id", get(payments::find))
        .route("/payments/:id/pay", patch(payments::pay))
        .route("/me/payments/owed", get(payments::list_owed))
        .route("/me/payments/received", get(payments::list_received))
        .layer(Extension(api))
}

pub async fn serve(api: DynAPI, addr: SocketAddr) -> Result<(), Error> {
    let app = router(api);

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|err| {
            tracing::error!("server error: {:?}", err);
            unexpected_error()
        })
}

#[cfg(test)]
use crate::error::ErrorKind;

#[tokio::test]
async fn user_from_header_test() {
    let id = Uuid::new_v4();
    let request = axum::http::Request::builder()
        .header(USER_ID_HEADER, id.to_string())
        .body(())
        .unwrap();

    let user = User::from_request(&mut RequestParts::new(request))
        .await
        .unwrap();
    assert_eq!(user.id, id);
    assert!(user.roles.is_empty());
}

#[tokio::test]
async fn user_without_header_test() {
    let request = axum::http::Request::builder().body(()).unwrap();
    let err = User::from_request(&mut RequestParts::new(request))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let request = axum::http::Request::builder()
        .header(USER_ID_HEADER, "driver-42")
        .body(())
        .unwrap();
    let err = User::from_request(&mut RequestParts::new(request))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}
