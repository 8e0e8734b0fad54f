use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    Executor, Pool, Postgres, Row, Transaction,
};
use uuid::Uuid;

use super::{Page, PaymentFilter, RequestFilter, RideFilter, Store};
use crate::entities::{Payment, Request, Ride, Trip};
use crate::error::{capacity_exceeded_error, invalid_state_error, not_found_error, Error};

type Database = Postgres;

pub struct PgStore {
    pool: Pool<Database>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip(db_uri))]
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS rides (
                id UUID PRIMARY KEY,
                driver_id UUID NOT NULL,
                status VARCHAR NOT NULL,
                is_active BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS ride_requests (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL REFERENCES rides(id),
                requester_id UUID NOT NULL,
                status VARCHAR NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                UNIQUE (ride_id, requester_id)
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS trips (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL REFERENCES rides(id),
                rider_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                UNIQUE (ride_id, rider_id)
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS payments (
                id UUID PRIMARY KEY,
                ride_id UUID NOT NULL REFERENCES rides(id),
                rider_id UUID NOT NULL,
                driver_id UUID NOT NULL,
                status VARCHAR NOT NULL,
                amount NUMERIC NOT NULL,
                generated_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                UNIQUE (ride_id, rider_id)
            )",
        )
        .await?;

        Ok(Self { pool })
    }
}

fn decode<T>(row: PgRow) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    let Json(value): Json<T> = row.try_get("data")?;

    Ok(value)
}

fn decode_all<T>(rows: Vec<PgRow>) -> Result<Vec<T>, Error>
where
    T: serde::de::DeserializeOwned,
{
    rows.into_iter().map(decode).collect()
}

#[tracing::instrument(skip(tx))]
async fn fetch_ride_for_update(
    tx: &mut Transaction<'_, Database>,
    id: &Uuid,
) -> Result<Ride, Error> {
    let row = sqlx::query("SELECT data FROM rides WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(not_found_error)?;

    decode(row)
}

#[tracing::instrument(skip(tx, ride))]
async fn update_ride(tx: &mut Transaction<'_, Database>, ride: &Ride) -> Result<(), Error> {
    let result = sqlx::query(
        "UPDATE rides SET status = $2, is_active = $3, data = $4 WHERE id = $1",
    )
    .bind(&ride.id)
    .bind(ride.status.name())
    .bind(ride.is_active)
    .bind(Json(ride))
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(not_found_error());
    }

    Ok(())
}

/// Writes a decided request only if the stored row is still pending.
#[tracing::instrument(skip(tx, request))]
async fn resolve_request(
    tx: &mut Transaction<'_, Database>,
    request: &Request,
) -> Result<(), Error> {
    let result = sqlx::query(
        "UPDATE ride_requests SET status = $2, data = $3 WHERE id = $1 AND status = 'pending'",
    )
    .bind(&request.id)
    .bind(request.status.name())
    .bind(Json(request))
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM ride_requests WHERE id = $1")
            .bind(&request.id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if exists {
            tracing::info!("request {} is already decided", request.id);
            return Err(invalid_state_error());
        }
        return Err(not_found_error());
    }

    Ok(())
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self, ride))]
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO rides (id, driver_id, status, is_active, created_at, data) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&ride.id)
        .bind(&ride.driver_id)
        .bind(ride.status.name())
        .bind(ride.is_active)
        .bind(&ride.created_at)
        .bind(Json(ride))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_ride(&self, id: Uuid) -> Result<Ride, Error> {
        let row = sqlx::query("SELECT data FROM rides WHERE id = $1")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(not_found_error)?;

        decode(row)
    }

    #[tracing::instrument(skip(self, ride))]
    async fn update_ride(&self, ride: &Ride) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        update_ride(&mut tx, ride).await?;

        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_ride(&self, id: Uuid) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        fetch_ride_for_update(&mut tx, &id).await?;

        for query in [
            "DELETE FROM payments WHERE ride_id = $1",
            "DELETE FROM trips WHERE ride_id = $1",
            "DELETE FROM ride_requests WHERE ride_id = $1",
            "DELETE FROM rides WHERE id = $1",
        ] {
            sqlx::query(query).bind(&id).execute(&mut tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_rides(&self, filter: RideFilter, page: Page) -> Result<Vec<Ride>, Error> {
        let query = match filter {
            RideFilter::Active => sqlx::query(
                "SELECT data FROM rides WHERE is_active ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            ),
            RideFilter::Driver(driver_id) => sqlx::query(
                "SELECT data FROM rides WHERE driver_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(driver_id),
        };

        let rows = bind_page(query, page).fetch_all(&self.pool).await?;

        decode_all(rows)
    }

    #[tracing::instrument(skip(self, request))]
    async fn insert_request(&self, request: &Request) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO ride_requests (id, ride_id, requester_id, status, created_at, data) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&request.id)
        .bind(&request.ride_id)
        .bind(&request.requester_id)
        .bind(request.status.name())
        .bind(&request.created_at)
        .bind(Json(request))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_request(&self, id: Uuid) -> Result<Request, Error> {
        let row = sqlx::query("SELECT data FROM ride_requests WHERE id = $1")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(not_found_error)?;

        decode(row)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_request_by_requester(
        &self,
        ride_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Request, Error> {
        let row =
            sqlx::query("SELECT data FROM ride_requests WHERE ride_id = $1 AND requester_id = $2")
                .bind(&ride_id)
                .bind(&requester_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(not_found_error)?;

        decode(row)
    }

    #[tracing::instrument(skip(self, request))]
    async fn resolve_request(&self, request: &Request) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        resolve_request(&mut tx, request).await?;

        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_requests(
        &self,
        filter: RequestFilter,
        page: Page,
    ) -> Result<Vec<Request>, Error> {
        let query = match filter {
            RequestFilter::Ride(ride_id) => sqlx::query(
                "SELECT data FROM ride_requests WHERE ride_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(ride_id),
            RequestFilter::Requester(requester_id) => sqlx::query(
                "SELECT data FROM ride_requests WHERE requester_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(requester_id),
            RequestFilter::Driver(driver_id) => sqlx::query(
                "SELECT q.data AS data FROM ride_requests q JOIN rides r ON r.id = q.ride_id WHERE r.driver_id = $1 ORDER BY q.created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(driver_id),
        };

        let rows = bind_page(query, page).fetch_all(&self.pool).await?;

        decode_all(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn count_trips(&self, ride_id: Uuid) -> Result<i64, Error> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM trips WHERE ride_id = $1")
            .bind(&ride_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn list_trips(&self, ride_id: Uuid) -> Result<Vec<Trip>, Error> {
        let rows = sqlx::query("SELECT data FROM trips WHERE ride_id = $1 ORDER BY created_at ASC")
            .bind(&ride_id)
            .fetch_all(&self.pool)
            .await?;

        decode_all(rows)
    }

    #[tracing::instrument(skip(self, request, trip))]
    async fn admit_trip(&self, request: &Request, trip: &Trip) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        // the row lock serialises admissions across processes sharing the database
        let ride = fetch_ride_for_update(&mut tx, &trip.ride_id).await?;
        if ride.is_finished() {
            tracing::info!("ride {} is finished, rolling back", ride.id);
            return Err(invalid_state_error());
        }

        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM trips WHERE ride_id = $1")
            .bind(&trip.ride_id)
            .fetch_one(&mut tx)
            .await?
            .try_get("count")?;

        if count >= ride.seats as i64 {
            tracing::info!("ride {} is full, rolling back", ride.id);
            return Err(capacity_exceeded_error());
        }

        sqlx::query(
            "INSERT INTO trips (id, ride_id, rider_id, created_at, data) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&trip.id)
        .bind(&trip.ride_id)
        .bind(&trip.rider_id)
        .bind(&trip.created_at)
        .bind(Json(trip))
        .execute(&mut tx)
        .await?;

        resolve_request(&mut tx, request).await?;

        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, ride, payments))]
    async fn settle_ride(&self, ride: &Ride, payments: &[Payment]) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        let stored = fetch_ride_for_update(&mut tx, &ride.id).await?;
        if stored.is_finished() {
            tracing::info!("ride {} is already settled, rolling back", ride.id);
            return Err(invalid_state_error());
        }

        for payment in payments {
            sqlx::query(
                "INSERT INTO payments (id, ride_id, rider_id, driver_id, status, amount, generated_at, data) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&payment.id)
            .bind(&payment.ride_id)
            .bind(&payment.rider_id)
            .bind(&payment.driver_id)
            .bind(payment.status.name())
            .bind(&payment.amount)
            .bind(&payment.generated_at)
            .bind(Json(payment))
            .execute(&mut tx)
            .await?;
        }

        update_ride(&mut tx, ride).await?;

        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_payment(&self, id: Uuid) -> Result<Payment, Error> {
        let row = sqlx::query("SELECT data FROM payments WHERE id = $1")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(not_found_error)?;

        decode(row)
    }

    #[tracing::instrument(skip(self, payment))]
    async fn update_payment(&self, payment: &Payment) -> Result<(), Error> {
        let result = sqlx::query("UPDATE payments SET status = $2, data = $3 WHERE id = $1")
            .bind(&payment.id)
            .bind(payment.status.name())
            .bind(Json(payment))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found_error());
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_payments(
        &self,
        filter: PaymentFilter,
        page: Page,
    ) -> Result<Vec<Payment>, Error> {
        let (column, id) = match filter {
            PaymentFilter::Ride(id) => ("ride_id", id),
            PaymentFilter::Rider(id) => ("rider_id", id),
            PaymentFilter::Driver(id) => ("driver_id", id),
        };

        let query = format!(
            "SELECT data FROM payments WHERE {} = $1 ORDER BY generated_at DESC LIMIT $2 OFFSET $3",
            column
        );

        let rows = bind_page(sqlx::query(&query).bind(id), page)
            .fetch_all(&self.pool)
            .await?;

        decode_all(rows)
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Database, sqlx::postgres::PgArguments>;

// LIMIT and OFFSET are bound after any filter parameter
fn bind_page<'q>(query: PgQuery<'q>, page: Page) -> PgQuery<'q> {
    query.bind(page.limit() as i64).bind(page.offset() as i64)
}

#[tokio::test]
#[ignore = "requires a postgres database at DATABASE_URL"]
async fn pg_store_test() {
    use crate::entities::new_ride_params;
    use crate::error::ErrorKind;

    let db_uri = std::env::var("DATABASE_URL").unwrap();
    let store = PgStore::new(&db_uri, 5).await.unwrap();

    let ride = Ride::new(Uuid::new_v4(), new_ride_params(1)).unwrap();
    store.insert_ride(&ride).await.unwrap();

    let mut first = Request::new(ride.id, Uuid::new_v4(), None);
    let mut second = Request::new(ride.id, Uuid::new_v4(), None);
    store.insert_request(&first).await.unwrap();
    store.insert_request(&second).await.unwrap();

    let err = store
        .insert_request(&Request::new(ride.id, first.requester_id, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);

    first.approve().unwrap();
    store
        .admit_trip(&first, &Trip::new(ride.id, first.requester_id))
        .await
        .unwrap();

    second.approve().unwrap();
    let err = store
        .admit_trip(&second, &Trip::new(ride.id, second.requester_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert!(store.fetch_request(second.id).await.unwrap().is_pending());

    // a decided request cannot be decided again
    let mut rejected = first.clone();
    rejected.status = crate::entities::RequestStatus::Rejected;
    let err = store.resolve_request(&rejected).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let found = store
        .fetch_request_by_requester(ride.id, second.requester_id)
        .await
        .unwrap();
    assert_eq!(found.id, second.id);

    let mut finished = ride.clone();
    finished.finish().unwrap();
    store.settle_ride(&finished, &[]).await.unwrap();
    let err = store.settle_ride(&finished, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let err = store
        .admit_trip(&second, &Trip::new(ride.id, second.requester_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let received = store
        .list_requests(RequestFilter::Driver(ride.driver_id), Page::default())
        .await
        .unwrap();
    assert_eq!(received.len(), 2);

    store.delete_ride(ride.id).await.unwrap();
    assert_eq!(store.count_trips(ride.id).await.unwrap(), 0);
    assert_eq!(
        store.fetch_request(first.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
