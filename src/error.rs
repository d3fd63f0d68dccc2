use serde_json::{json, Value};
use thiserror::Error;

/// Failure of a single Canvas request or paginated listing.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Canvas rejected every credential variant for {path}")]
    AuthFailure { path: String },

    #[error("Canvas returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Canvas request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed Canvas response for {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Invalid Canvas URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid Canvas client configuration: {0}")]
    InvalidConfig(String),
}

impl FetchError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FetchError::AuthFailure { .. })
    }
}

/// A failure that stops an import run before any item is processed.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("No stored Canvas session for user {user_id}")]
    NoSession { user_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Canvas authentication failed: {0}")]
    Auth(#[source] FetchError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::NoSession { .. } => "no_session",
            ImportError::InvalidInput(_) => "invalid_input",
            ImportError::Auth(_) => "auth_failure",
            ImportError::Database(_) => "database",
        }
    }

    /// The `{ok: false, error, detail?}` shape returned to callers.
    pub fn to_json(&self) -> Value {
        let detail = match self {
            ImportError::NoSession { .. } => None,
            ImportError::InvalidInput(msg) => Some(msg.clone()),
            ImportError::Auth(e) => Some(e.to_string()),
            ImportError::Database(e) => Some(e.to_string()),
        };
        match detail {
            Some(detail) => json!({ "ok": false, "error": self.code(), "detail": detail }),
            None => json!({ "ok": false, "error": self.code() }),
        }
    }
}

pub type ImportOutcome<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_session_json_has_no_detail() {
        let err = ImportError::NoSession {
            user_id: "u1".into(),
        };
        let v = err.to_json();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "no_session");
        assert!(v.get("detail").is_none());
    }

    #[test]
    fn auth_error_carries_detail() {
        let err = ImportError::Auth(FetchError::AuthFailure {
            path: "/api/v1/courses".into(),
        });
        let v = err.to_json();
        assert_eq!(v["error"], "auth_failure");
        assert!(v["detail"].as_str().unwrap().contains("/api/v1/courses"));
    }
}
