use std::sync::Arc;

use carpool::api::DynAPI;
use carpool::config::Config;
use carpool::db::{MemoryStore, PgStore, Store};
use carpool::engine::Engine;
use carpool::error::{unexpected_error, Error};
use carpool::{server, simulation};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    match std::env::args().nth(1).as_deref() {
        Some("simulate") => {
            // simulations always run against a throwaway store
            let api = engine(Arc::new(MemoryStore::new()))?;
            let report = simulation::run(api, simulation::Settings::default()).await?;

            let json = serde_json::to_string_pretty(&report).map_err(|err| {
                tracing::error!("failed to render report: {:?}", err);
                unexpected_error()
            })?;
            println!("{}", json);

            Ok(())
        }
        _ => {
            let store: Arc<dyn Store> = match &config.database_url {
                Some(url) => Arc::new(PgStore::new(url, config.max_connections).await?),
                None => {
                    tracing::warn!("DATABASE_URL is not set, rides are kept in memory");
                    Arc::new(MemoryStore::new())
                }
            };

            server::serve(engine(store)?, config.listen_addr).await
        }
    }
}

fn engine(store: Arc<dyn Store>) -> Result<DynAPI, Error> {
    Ok(Arc::new(Engine::new(store)?))
}
