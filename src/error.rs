use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::{self, Debug, Display};

#[derive(Debug)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Internal,
    InvalidState,
    InvalidInput,
    Unauthorized,
    NotFound,
    UniqueConstraintViolation,
    CapacityExceeded,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            100 => ErrorKind::InvalidState,
            101 => ErrorKind::InvalidInput,
            102 => ErrorKind::Unauthorized,
            103 => ErrorKind::NotFound,
            104 => ErrorKind::UniqueConstraintViolation,
            105 => ErrorKind::CapacityExceeded,
            _ => ErrorKind::Internal,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return not_found_error();
        }

        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => return unique_constraint_violation_error(),
                // foreign_key_violation, the referenced ride is gone
                Some("23503") => return not_found_error(),
                _ => (),
            }
        }

        database_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        authorization_engine_error(err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidState
            | ErrorKind::UniqueConstraintViolation
            | ErrorKind::CapacityExceeded => StatusCode::CONFLICT,
        };

        let error_message = match self.kind() {
            ErrorKind::Internal => "Internal Server Error",
            _ => self.message.as_str(),
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub fn invalid_state_error() -> Error {
    Error {
        code: 100,
        message: "invalid state".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: 101,
        message: "invalid input".into(),
    }
}

pub fn unauthorized_error() -> Error {
    Error {
        code: 102,
        message: "unauthorized".into(),
    }
}

pub fn not_found_error() -> Error {
    Error {
        code: 103,
        message: "not found".into(),
    }
}

pub fn unique_constraint_violation_error() -> Error {
    Error {
        code: 104,
        message: "unique constraint violation".into(),
    }
}

pub fn capacity_exceeded_error() -> Error {
    Error {
        code: 105,
        message: "capacity exceeded".into(),
    }
}

pub fn env_var_error(err: env::VarError) -> Error {
    tracing::error!("environment variable error: {:?}", err);

    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn database_error<T: Debug>(err: T) -> Error {
    tracing::error!("database error: {:?}", err);

    Error {
        code: 2,
        message: "database error".into(),
    }
}

pub fn authorization_engine_error<T: Debug>(err: T) -> Error {
    tracing::error!("authorization engine error: {:?}", err);

    Error {
        code: 3,
        message: "authorization engine error".into(),
    }
}

pub fn configuration_error(message: &str) -> Error {
    Error {
        code: 4,
        message: format!("configuration error: {}", message),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

#[test]
fn error_kind_test() {
    assert_eq!(invalid_state_error().kind(), ErrorKind::InvalidState);
    assert_eq!(invalid_input_error().kind(), ErrorKind::InvalidInput);
    assert_eq!(unauthorized_error().kind(), ErrorKind::Unauthorized);
    assert_eq!(not_found_error().kind(), ErrorKind::NotFound);
    assert_eq!(
        unique_constraint_violation_error().kind(),
        ErrorKind::UniqueConstraintViolation
    );
    assert_eq!(capacity_exceeded_error().kind(), ErrorKind::CapacityExceeded);
    assert_eq!(database_error("boom").kind(), ErrorKind::Internal);
    assert_eq!(configuration_error("bad").kind(), ErrorKind::Internal);
}

#[test]
fn row_not_found_maps_to_not_found_test() {
    let err: Error = sqlx::Error::RowNotFound.into();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn into_response_status_test() {
    assert_eq!(
        capacity_exceeded_error().into_response().status(),
        StatusCode::CONFLICT
    );
    assert_eq!(
        not_found_error().into_response().status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        unauthorized_error().into_response().status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        unexpected_error().into_response().status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
