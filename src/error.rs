use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum WardenError {
    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("{0} is not supported by this engine")]
    NotSupported(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Role {role} is not in the allowed roles {allowed:?}")]
    InvalidRole { role: String, allowed: Vec<String> },

    #[error("No database manager registered for engine {engine} ({workload})")]
    NoManager { engine: String, workload: String },

    #[error("Member not found in cluster: {0}")]
    MemberNotFound(String),

    #[error("DCS error: {0}")]
    Dcs(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event error: {0}")]
    Event(String),
}

pub type Result<T> = std::result::Result<T, WardenError>;

impl From<std::io::Error> for WardenError {
    fn from(e: std::io::Error) -> Self {
        WardenError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for WardenError {
    fn from(e: reqwest::Error) -> Self {
        WardenError::Http(e.to_string())
    }
}

impl WardenError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WardenError::NotImplemented(_) => StatusCode::NOT_FOUND,
            WardenError::NotSupported(_) => StatusCode::NOT_FOUND,
            WardenError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            WardenError::InvalidRole { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            WardenError::NoManager { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WardenError::MemberNotFound(_) => StatusCode::NOT_FOUND,
            WardenError::Dcs(_) => StatusCode::BAD_GATEWAY,
            WardenError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WardenError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            WardenError::Http(_) => StatusCode::BAD_GATEWAY,
            WardenError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WardenError::Json(_) => StatusCode::BAD_REQUEST,
            WardenError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WardenError::Event(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the "this engine cannot do that" family, which dispatch
    /// reports as `NotImplemented` rather than `Failed`.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            WardenError::NotImplemented(_) | WardenError::NotSupported(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── status_code mapping ─────────────────────────────────────────────

    #[test]
    fn not_implemented_is_404() {
        let e = WardenError::NotImplemented("getRole".into());
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_supported_is_404() {
        let e = WardenError::NotSupported("lock".into());
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_request_is_400() {
        let e = WardenError::InvalidRequest("missing operation".into());
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn no_manager_is_503() {
        let e = WardenError::NoManager {
            engine: "mysql".into(),
            workload: "replication".into(),
        };
        assert_eq!(e.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn timeout_is_504() {
        assert_eq!(
            WardenError::Timeout(800).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn dcs_error_is_502() {
        let e = WardenError::Dcs("connection refused".into());
        assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);
    }

    // ── Display ─────────────────────────────────────────────────────────

    #[test]
    fn invalid_role_display_lists_allowed_roles() {
        let e = WardenError::InvalidRole {
            role: "arbiter".into(),
            allowed: vec!["primary".into(), "secondary".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("arbiter"));
        assert!(msg.contains("primary"));
        assert!(msg.contains("secondary"));
    }

    #[test]
    fn no_manager_display_names_engine() {
        let e = WardenError::NoManager {
            engine: "postgresql".into(),
            workload: "replication".into(),
        };
        assert!(e.to_string().contains("postgresql"));
    }

    #[test]
    fn unsupported_family() {
        assert!(WardenError::NotSupported("lock".into()).is_unsupported());
        assert!(WardenError::NotImplemented("x".into()).is_unsupported());
        assert!(!WardenError::Engine("boom".into()).is_unsupported());
    }

    // ── From conversions ────────────────────────────────────────────────

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WardenError = io_err.into();
        assert!(matches!(err, WardenError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: WardenError = json_err.into();
        assert!(matches!(err, WardenError::Json(_)));
    }
}

// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        let error_code = match &self {
            WardenError::NotImplemented(_) => "not_implemented",
            WardenError::NotSupported(_) => "not_supported",
            WardenError::InvalidRequest(_) => "invalid_request",
            WardenError::InvalidRole { .. } => "invalid_role",
            WardenError::NoManager { .. } => "no_manager",
            WardenError::MemberNotFound(_) => "member_not_found",
            WardenError::Dcs(_) => "dcs_error",
            WardenError::Engine(_) => "engine_error",
            WardenError::Timeout(_) => "timeout",
            WardenError::Http(_) => "http_error",
            WardenError::Io(_) => "io_error",
            WardenError::Json(_) => "json_error",
            WardenError::Config(_) => "config_error",
            WardenError::Event(_) => "event_error",
        };
        let body = ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(all(test, feature = "axum-support"))]
mod into_response_tests {
    use super::*;

    #[test]
    fn into_response_status_matches_status_code_for_all_variants() {
        let errors: Vec<WardenError> = vec![
            WardenError::NotImplemented("x".into()),
            WardenError::NotSupported("x".into()),
            WardenError::InvalidRequest("x".into()),
            WardenError::InvalidRole {
                role: "r".into(),
                allowed: vec![],
            },
            WardenError::NoManager {
                engine: "e".into(),
                workload: "w".into(),
            },
            WardenError::MemberNotFound("m".into()),
            WardenError::Dcs("x".into()),
            WardenError::Engine("x".into()),
            WardenError::Timeout(1),
            WardenError::Http("x".into()),
            WardenError::Io("x".into()),
            WardenError::Json("x".into()),
            WardenError::Config("x".into()),
            WardenError::Event("x".into()),
        ];
        for e in errors {
            let expected = e.status_code();
            let actual = e.clone().into_response().status();
            assert_eq!(actual, expected, "status mismatch for {:?}", e);
        }
    }
}
