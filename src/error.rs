use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::{self, Debug, Display};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

const INVALID_STATE: i32 = 100;
const VALIDATION: i32 = 101;
const UNAUTHORIZED: i32 = 102;
const NOT_FOUND: i32 = 103;
const UNAUTHENTICATED: i32 = 104;
const INVALID_COORDINATE: i32 = 105;
const INVALID_RATE: i32 = 106;

impl Error {
    pub fn is_invalid_state_error(&self) -> bool {
        self.code == INVALID_STATE
    }

    /// True for every input problem reported back as a 400, including bad
    /// coordinates and rates.
    pub fn is_validation_error(&self) -> bool {
        matches!(self.code, VALIDATION | INVALID_COORDINATE | INVALID_RATE)
    }

    pub fn is_unauthorized_error(&self) -> bool {
        self.code == UNAUTHORIZED
    }

    pub fn is_not_found_error(&self) -> bool {
        self.code == NOT_FOUND
    }

    pub fn is_internal(&self) -> bool {
        (1..=99).contains(&self.code)
    }

    fn status(&self) -> StatusCode {
        match self.code {
            1..=99 => StatusCode::INTERNAL_SERVER_ERROR,
            INVALID_STATE => StatusCode::CONFLICT,
            UNAUTHORIZED => StatusCode::FORBIDDEN,
            NOT_FOUND => StatusCode::NOT_FOUND,
            UNAUTHENTICATED => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
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
        database_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        tracing::error!("authorization policy error: {:?}", err);
        unexpected_error()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        let error_message = if self.is_internal() {
            tracing::error!("internal error: {}", self);
            "Internal Server Error"
        } else {
            self.message.as_str()
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
        code: INVALID_STATE,
        message: "invalid state".into(),
    }
}

pub fn validation_error(message: impl Into<String>) -> Error {
    Error {
        code: VALIDATION,
        message: message.into(),
    }
}

pub fn invalid_input_error() -> Error {
    validation_error("invalid input")
}

pub fn unauthorized_error() -> Error {
    Error {
        code: UNAUTHORIZED,
        message: "not authorized".into(),
    }
}

pub fn not_found_error() -> Error {
    Error {
        code: NOT_FOUND,
        message: "not found".into(),
    }
}

pub fn unauthenticated_error() -> Error {
    Error {
        code: UNAUTHENTICATED,
        message: "missing or invalid credentials".into(),
    }
}

pub fn invalid_coordinate_error() -> Error {
    Error {
        code: INVALID_COORDINATE,
        message: "invalid coordinate".into(),
    }
}

pub fn invalid_rate_error() -> Error {
    Error {
        code: INVALID_RATE,
        message: "invalid rate".into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
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

pub fn reqwest_error(err: reqwest::Error) -> Error {
    tracing::warn!("http client error: {}", err);

    Error {
        code: 3,
        message: "reqwest error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

#[test]
fn error_status_mapping_test() {
    assert_eq!(invalid_state_error().status(), StatusCode::CONFLICT);
    assert_eq!(validation_error("x").status(), StatusCode::BAD_REQUEST);
    assert_eq!(invalid_coordinate_error().status(), StatusCode::BAD_REQUEST);
    assert_eq!(invalid_rate_error().status(), StatusCode::BAD_REQUEST);
    assert_eq!(unauthorized_error().status(), StatusCode::FORBIDDEN);
    assert_eq!(not_found_error().status(), StatusCode::NOT_FOUND);
    assert_eq!(unauthenticated_error().status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream_error().status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert!(invalid_rate_error().is_validation_error());
    assert!(!invalid_state_error().is_validation_error());
}
