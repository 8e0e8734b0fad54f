use chrono::{DateTime, Utc};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_state_error, Error};

/// A rider's bid to join a ride.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub requester_id: Uuid,
    pub status: Status,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Approved => "approved".into(),
            Self::Rejected => "rejected".into(),
        }
    }
}

impl Request {
    pub fn new(ride_id: Uuid, requester_id: Uuid, comment: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ride_id,
            requester_id,
            status: Status::Pending,
            comment,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }

    #[tracing::instrument]
    pub fn approve(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Approved;
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument]
    pub fn reject(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                self.status = Status::Rejected;
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }
}

impl PolarClass for Request {
    fn get_polar_class_builder() -> oso::ClassBuilder<Request> {
        oso::Class::builder()
            .name("Request")
            .add_attribute_getter("id", |recv: &Request| recv.id.to_string())
            .add_attribute_getter("ride_id", |recv: &Request| recv.ride_id.to_string())
            .add_attribute_getter("requester_id", |recv: &Request| {
                recv.requester_id.to_string()
            })
            .add_attribute_getter("status", |recv: &Request| recv.status.name())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Request::get_polar_class_builder();
        builder.build()
    }
}

#[test]
fn request_transitions_test() {
    use crate::error::ErrorKind;

    let mut approved = Request::new(Uuid::new_v4(), Uuid::new_v4(), None);
    assert!(approved.is_pending());

    approved.approve().unwrap();
    assert_eq!(approved.status, Status::Approved);
    assert_eq!(approved.approve().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(approved.reject().unwrap_err().kind(), ErrorKind::InvalidState);

    let mut rejected = Request::new(Uuid::new_v4(), Uuid::new_v4(), Some("two bags".into()));

    rejected.reject().unwrap();
    assert_eq!(rejected.status, Status::Rejected);
    assert_eq!(rejected.approve().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(rejected.reject().unwrap_err().kind(), ErrorKind::InvalidState);
}
