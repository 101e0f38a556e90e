use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("account or role is inactive")]
    InactiveAccount,

    #[error("permission denied: role '{role}' lacks {module}.{action}")]
    PermissionDenied {
        module: String,
        action: String,
        role: String,
    },

    /// Row exists but belongs to another user. Rendered exactly like
    /// [`AuthError::NotFound`] so callers cannot probe for other users' rows.
    #[error("ownership violation on {resource} '{id}'")]
    OwnershipViolation { resource: String, id: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access configuration error: {0}")]
    Configuration(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Business outcomes a caller is expected to handle. Everything else is a
    /// fault and must end in a deny.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            AuthError::PermissionDenied { .. } | AuthError::OwnershipViolation { .. }
        )
    }

    pub fn permission_denied(module: &str, action: &str, role: &str) -> Self {
        AuthError::PermissionDenied {
            module: module.to_string(),
            action: action.to_string(),
            role: role.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::OwnershipViolation { resource, id } => {
                tracing::warn!(resource = %resource, id = %id, "ownership violation");
            }
            AuthError::Configuration(msg) => {
                tracing::error!(error = %msg, "access configuration error");
            }
            AuthError::StorageUnavailable(msg) => {
                tracing::error!(error = %msg, "access store unavailable");
            }
            AuthError::Database(msg) | AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
            }
            _ => {}
        }

        let (status, body) = match self {
            AuthError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "please log in" }),
            ),
            AuthError::InactiveAccount => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": "account or role is inactive" }),
            ),
            AuthError::PermissionDenied {
                module,
                action,
                role,
            } => (
                StatusCode::FORBIDDEN,
                serde_json::json!({
                    "error": "permission denied",
                    "module": module,
                    "action": action,
                    "role": role,
                }),
            ),
            AuthError::OwnershipViolation { .. } | AuthError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": "not found" }),
            ),
            AuthError::StorageUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": "service temporarily unavailable" }),
            ),
            AuthError::Duplicate(msg) | AuthError::Conflict(msg) => {
                (StatusCode::CONFLICT, serde_json::json!({ "error": msg }))
            }
            AuthError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            AuthError::Configuration(_) | AuthError::Database(_) | AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "internal error" }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                AuthError::StorageUnavailable(e.to_string())
            }
            _ => AuthError::Database(e.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AuthError::StorageUnavailable(e.to_string())
            }
            sqlx::Error::RowNotFound => AuthError::NotFound("row not found".into()),
            _ => AuthError::Database(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(err: AuthError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn ownership_violation_looks_like_not_found() {
        let hidden = body_of(AuthError::OwnershipViolation {
            resource: "reports".into(),
            id: "r-1".into(),
        })
        .await;
        let missing = body_of(AuthError::NotFound("report not found".into())).await;
        assert_eq!(hidden, missing);
        assert_eq!(hidden.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn permission_denied_names_module_action_and_role() {
        let (status, body) =
            body_of(AuthError::permission_denied("cards", "read", "Advertiser")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["module"], "cards");
        assert_eq!(body["action"], "read");
        assert_eq!(body["role"], "Advertiser");
    }

    #[tokio::test]
    async fn faults_do_not_leak_details() {
        let (status, body) = body_of(AuthError::Database("no such table: roles".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal error");
    }

    #[test]
    fn only_denials_are_expected() {
        assert!(AuthError::permission_denied("a", "read", "r").is_expected());
        assert!(
            AuthError::OwnershipViolation {
                resource: "cards".into(),
                id: "1".into()
            }
            .is_expected()
        );
        assert!(!AuthError::StorageUnavailable("timeout".into()).is_expected());
        assert!(!AuthError::Configuration("x".into()).is_expected());
    }
}
