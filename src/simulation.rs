use std::future::Future;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand_distr::{Binomial, Distribution, Normal, Uniform};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    api::DynAPI,
    auth::User,
    entities::{NewRide, Payment, Ride},
    error::{unexpected_error, Error, ErrorKind},
};

const PLACES: [&str; 10] = [
    "Koramangala",
    "Indiranagar",
    "Whitefield",
    "Jayanagar",
    "HSR Layout",
    "Hebbal",
    "Malleshwaram",
    "Electronic City",
    "Marathahalli",
    "Yelahanka",
];

/// Shape of the generated workload.
#[derive(Clone, Debug)]
pub struct Settings {
    pub rides: usize,
    pub max_seats: i32,
    /// mean number of riders asking for each ride
    pub mean_requests: u64,
    pub workers: usize,
    pub reject_probability: f64,
    /// chance that a driver or rider sends the same decision twice
    pub repeat_probability: f64,
    pub pay_probability: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rides: 50,
            max_seats: 4,
            mean_requests: 6,
            workers: 16,
            reject_probability: 0.1,
            repeat_probability: 0.2,
            pay_probability: 0.8,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    pub rides: usize,
    pub seats: usize,
    pub requests: usize,
    pub approved: usize,
    pub rejected: usize,
    pub turned_away: usize,
    /// repeated approvals, rejections, finishes and payments that were refused
    pub repeats_refused: usize,
    pub trips: usize,
    /// rides that ended up with more trips than seats
    pub oversold: usize,
    pub payments: usize,
    pub paid: usize,
}

fn sample_binomial(n: u64, p: f64) -> u64 {
    match Binomial::new(n, p) {
        Ok(bin) => bin.sample(&mut rand::thread_rng()),
        Err(_) => 0,
    }
}

fn coin(p: f64) -> bool {
    sample_binomial(1, p) > 0
}

fn sample_ride(max_seats: i32) -> NewRide {
    let mut rng = rand::thread_rng();

    let mut places = PLACES.choose_multiple(&mut rng, 2);
    let source = places.next().unwrap_or(&PLACES[0]).to_string();
    let destination = places.next().unwrap_or(&PLACES[1]).to_string();

    let seats = Uniform::new_inclusive(1, max_seats.max(1)).sample(&mut rng);
    let price = Uniform::new_inclusive(8, 15).sample(&mut rng);
    let distance = Normal::new(12.0_f64, 4.0)
        .map(|normal| normal.sample(&mut rng))
        .unwrap_or(12.0)
        .clamp(0.5, 60.0);

    let start_time = Utc::now() + Duration::hours(1);

    NewRide {
        source,
        destination,
        start_time,
        end_time: start_time + Duration::minutes(45),
        seats,
        price_per_distance: Decimal::from(price),
        distance: Decimal::from_f64(distance)
            .unwrap_or(Decimal::TEN)
            .round_dp(1),
        car_name: None,
        car_number: None,
        description: None,
    }
}

/// Tolerates the refusals a well-behaved engine gives to a repeated decision.
fn count_repeat<T>(result: Result<T, Error>, report: &mut Report) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ErrorKind::InvalidState => {
            report.repeats_refused += 1;
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Runs `work` over `items` on a pool of `workers` tasks and fails on the first
/// error any of them reports.
async fn fan_out<T, F, Fut>(workers: usize, items: Vec<T>, work: F) -> Result<(), Error>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    let (tx, rx): (Sender<T>, Receiver<T>) = async_channel::unbounded();

    for item in items {
        tx.send(item).await.map_err(|_| unexpected_error())?;
    }
    tx.close();

    let work = Arc::new(work);
    let handles = (0..workers.max(1)).map(|_| {
        let rx = rx.clone();
        let work = work.clone();

        tokio::spawn(async move {
            while let Ok(item) = rx.recv().await {
                work(item).await?;
            }

            Ok::<(), Error>(())
        })
    });

    for joined in futures::future::join_all(handles).await {
        joined.map_err(|err| {
            tracing::error!("simulation worker died: {:?}", err);
            unexpected_error()
        })??;
    }

    Ok(())
}

struct Simulation {
    api: DynAPI,
    settings: Settings,
    report: Mutex<Report>,
    payments: Mutex<Vec<Payment>>,
}

impl Simulation {
    #[tracing::instrument(skip(self))]
    async fn publish_rides(&self) -> Result<Vec<(User, Ride)>, Error> {
        let mut rides = vec![];

        for _ in 0..self.settings.rides {
            let driver = User::new(Uuid::new_v4());
            let params = sample_ride(self.settings.max_seats);
            let ride = self.api.create_ride(driver.clone(), params).await?;

            rides.push((driver, ride));
        }

        let mut report = self.report.lock().await;
        report.rides = rides.len();
        report.seats = rides.iter().map(|(_, ride)| ride.seats as usize).sum();

        Ok(rides)
    }

    #[tracing::instrument(skip(self, rides))]
    async fn submit_requests(&self, rides: &[(User, Ride)]) -> Result<Vec<(User, Uuid)>, Error> {
        let mut decisions = vec![];

        for (driver, ride) in rides {
            let count = sample_binomial(self.settings.mean_requests * 2, 0.5);

            for _ in 0..count {
                let rider = User::new(Uuid::new_v4());
                let request = self.api.submit_request(rider, ride.id, None).await?;

                decisions.push((driver.clone(), request.id));
                if coin(self.settings.repeat_probability) {
                    decisions.push((driver.clone(), request.id));
                }
            }

            self.report.lock().await.requests += count as usize;
        }

        decisions.shuffle(&mut rand::thread_rng());

        Ok(decisions)
    }

    #[tracing::instrument(skip(self))]
    async fn decide(&self, driver: User, request_id: Uuid) -> Result<(), Error> {
        if coin(self.settings.reject_probability) {
            let result = self.api.reject_request(driver, request_id).await;

            let mut report = self.report.lock().await;
            if count_repeat(result, &mut report)?.is_some() {
                report.rejected += 1;
            }

            return Ok(());
        }

        let result = self.api.approve_request(driver, request_id).await;

        let mut report = self.report.lock().await;
        match result {
            Err(err) if err.kind() == ErrorKind::CapacityExceeded => {
                tracing::info!("ride is full");
                report.turned_away += 1;
            }
            result => {
                if count_repeat(result, &mut report)?.is_some() {
                    report.approved += 1;
                }
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, rides))]
    async fn audit_trips(&self, rides: &[(User, Ride)]) -> Result<(), Error> {
        for (driver, ride) in rides {
            let trips = self.api.list_trips(driver.clone(), ride.id).await?;

            let mut report = self.report.lock().await;
            report.trips += trips.len();

            if trips.len() > ride.seats as usize {
                tracing::error!(
                    ride_id = %ride.id,
                    trips = trips.len(),
                    seats = ride.seats,
                    "ride oversold"
                );
                report.oversold += 1;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn finish(&self, driver: User, ride_id: Uuid) -> Result<(), Error> {
        let repeat = coin(self.settings.repeat_probability);

        let payments = self.api.finish_ride(driver.clone(), ride_id).await?;
        self.report.lock().await.payments += payments.len();
        self.payments.lock().await.extend(payments);

        if repeat {
            let result = self.api.finish_ride(driver, ride_id).await;
            count_repeat(result, &mut *self.report.lock().await)?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn pay(&self, payment_id: Uuid, rider_id: Uuid) -> Result<(), Error> {
        if !coin(self.settings.pay_probability) {
            return Ok(());
        }

        let rider = User::new(rider_id);
        self.api.pay_payment(rider.clone(), payment_id).await?;
        self.report.lock().await.paid += 1;

        if coin(self.settings.repeat_probability) {
            let result = self.api.pay_payment(rider, payment_id).await;
            count_repeat(result, &mut *self.report.lock().await)?;
        }

        Ok(())
    }
}

/// Drives a full booking day against `api`: drivers publish rides, riders pile
/// on requests, drivers approve and reject them concurrently, then every ride
/// is finished and most riders pay.
#[tracing::instrument(skip(api))]
pub async fn run(api: DynAPI, settings: Settings) -> Result<Report, Error> {
    let workers = settings.workers;
    let s = Arc::new(Simulation {
        api,
        settings,
        report: Mutex::new(Report::default()),
        payments: Mutex::new(vec![]),
    });

    let rides = s.publish_rides().await?;
    let decisions = s.submit_requests(&rides).await?;

    tracing::info!(decisions = decisions.len(), "deciding requests");
    let sim = s.clone();
    fan_out(workers, decisions, move |(driver, request_id)| {
        let sim = sim.clone();
        async move { sim.decide(driver, request_id).await }
    })
    .await?;

    s.audit_trips(&rides).await?;

    tracing::info!("finishing rides");
    let sim = s.clone();
    let finishes: Vec<(User, Uuid)> = rides
        .iter()
        .map(|(driver, ride)| (driver.clone(), ride.id))
        .collect();
    fan_out(workers, finishes, move |(driver, ride_id)| {
        let sim = sim.clone();
        async move { sim.finish(driver, ride_id).await }
    })
    .await?;

    tracing::info!("settling payments");
    let sim = s.clone();
    let bills: Vec<(Uuid, Uuid)> = s
        .payments
        .lock()
        .await
        .iter()
        .map(|payment| (payment.id, payment.rider_id))
        .collect();
    fan_out(workers, bills, move |(payment_id, rider_id)| {
        let sim = sim.clone();
        async move { sim.pay(payment_id, rider_id).await }
    })
    .await?;

    let report = s.report.lock().await.clone();

    tracing::info!(?report, "simulation finished");

    Ok(report)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simulation_never_oversells_test() {
    use crate::db::MemoryStore;
    use crate::engine::Engine;

    let engine = Engine::new(Arc::new(MemoryStore::new())).unwrap();
    let settings = Settings {
        rides: 8,
        max_seats: 3,
        mean_requests: 5,
        workers: 8,
        ..Default::default()
    };

    let report = run(Arc::new(engine), settings).await.unwrap();

    assert_eq!(report.rides, 8);
    assert_eq!(report.oversold, 0);
    assert_eq!(report.trips, report.approved);
    assert!(report.trips <= report.seats);
    assert_eq!(report.payments, report.trips);
    assert!(report.paid <= report.payments);
    assert!(report.approved + report.rejected <= report.requests);
}
