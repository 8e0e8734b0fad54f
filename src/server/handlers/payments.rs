use axum::extract::{Extension, Json, Path, Query};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::auth::User;
use crate::db::Page;
use crate::entities::Payment;
use crate::error::Error;

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, Error> {
    let payment = api.find_payment(user, id).await?;

    Ok(payment.into())
}

pub async fn pay(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, Error> {
    let payment = api.pay_payment(user, id).await?;

    Ok(payment.into())
}

pub async fn list_owed(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Payment>>, Error> {
    let payments = api.list_owed_payments(user, page).await?;

    Ok(payments.into())
}

pub async fn list_received(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Payment>>, Error> {
    let payments = api.list_received_payments(user, page).await?;

    Ok(payments.into())
}
