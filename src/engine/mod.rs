pub mod allocator;
mod request_api;
mod ride_api;
mod settlement;
mod trip_api;

use std::sync::Arc;

use oso::Oso;

use crate::{
    api::API,
    auth::authorizor,
    db::Store,
    error::{unauthorized_error, Error},
};

use allocator::SeatAllocator;

pub struct Engine {
    store: Arc<dyn Store>,
    allocator: SeatAllocator,
    authorizor: Oso,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(store: Arc<dyn Store>) -> Result<Self, Error> {
        Ok(Self {
            store,
            allocator: SeatAllocator::new(),
            authorizor: authorizor::new()?,
        })
    }
}

impl Engine {
    pub fn is_allowed<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<bool, Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        Ok(self.authorizor.is_allowed(actor, action, resource)?)
    }

    pub fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        if self.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(unauthorized_error())
    }
}

impl API for Engine {}

#[cfg(test)]
pub fn new_test_engine() -> Engine {
    use crate::db::MemoryStore;

    Engine::new(Arc::new(MemoryStore::new())).unwrap()
}

#[test]
fn system_user_test() {
    use tokio_test::block_on;
    use uuid::Uuid;

    use crate::api::RideAPI;
    use crate::auth::User;
    use crate::entities::{new_ride_params, RideChanges};

    let engine = new_test_engine();
    let driver = User::new(Uuid::new_v4());
    let system = User::new_system_user();

    let ride = block_on(engine.create_ride(driver.clone(), new_ride_params(1))).unwrap();

    let changes = RideChanges {
        description: Some("rescheduled by support".into()),
        ..Default::default()
    };
    let ride = block_on(engine.update_ride(system.clone(), ride.id, changes)).unwrap();
    assert_eq!(ride.driver_id, driver.id);

    assert!(engine.is_allowed(system, "finish", ride.clone()).unwrap());
    assert!(!engine.is_allowed(User::new(Uuid::new_v4()), "finish", ride).unwrap());
}
