use thiserror::Error;

/// Taxonomia de erros do domínio. Every public operation resolves to one of
/// these kinds; the HTTP and RPC mappers translate them at the boundary.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("still alive: {0}")]
    StillAlive(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("lease unavailable: {0}")]
    LeaseUnavailable(String),
    #[error("cannot connect to API: {0}")]
    ApiConnection(String),
    #[error("failed to retrieve JWKS: {0}")]
    JwksRetrieval(String),
    #[error("invalid session token: {0}")]
    SessionTokenInvalid(String),
    #[error("ambiguous choice: {0}")]
    AmbiguousChoice(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("internal server error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Wire-level error code, stable across HTTP and RPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::BadRequest(_) => "bad request",
            DomainError::Unauthorized => "unauthorized access",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::NotFound(_) => "not found",
            DomainError::AlreadyExists(_) => "already exists",
            DomainError::StillAlive(_) => "still alive",
            DomainError::MethodNotAllowed(_) => "method not allowed",
            DomainError::LeaseUnavailable(_) => "lease unavailable",
            DomainError::ApiConnection(_) => "cannot connect to api",
            DomainError::JwksRetrieval(_) => "jwks retrieval failed",
            DomainError::SessionTokenInvalid(_) => "session token invalid",
            DomainError::AmbiguousChoice(_) => "ambiguous choice",
            DomainError::NotImplemented => "not implemented",
            DomainError::Internal(_) => "internal server error",
        }
    }

    /// Whether a monitor worker should retry after seeing this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DomainError::ApiConnection(_)
                | DomainError::LeaseUnavailable(_)
                | DomainError::Internal(_)
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound("entity not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.constraint().is_some() {
                    DomainError::AlreadyExists(db_err.message().to_string())
                } else {
                    DomainError::Internal(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut => {
                DomainError::Internal("database session pool exhausted".to_string())
            }
            _ => DomainError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::BadRequest(format!("invalid JSON: {}", err))
    }
}

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::BadRequest(format!("invalid UUID: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DomainError::NotFound("x".into()).code(), "not found");
        assert_eq!(DomainError::Unauthorized.code(), "unauthorized access");
        assert_eq!(DomainError::StillAlive("ctl".into()).code(), "still alive");
        assert_eq!(
            DomainError::LeaseUnavailable("ctl".into()).code(),
            "lease unavailable"
        );
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let err: DomainError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn test_unauthorized_message_is_generic() {
        // The rendered message must not disclose what was being accessed.
        assert_eq!(DomainError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(DomainError::ApiConnection("dial".into()).is_retriable());
        assert!(!DomainError::Forbidden("no".into()).is_retriable());
    }
}
