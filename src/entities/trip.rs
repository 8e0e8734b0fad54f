use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A confirmed seat on a ride. Trips are only ever created by an approval and
/// are never updated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn new(ride_id: Uuid, rider_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            ride_id,
            rider_id,
            created_at: Utc::now(),
        }
    }
}
