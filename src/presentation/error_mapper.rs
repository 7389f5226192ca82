// ============================================================================
// ERROR MAPPER - TAXONOMIA DE DOMÍNIO PARA HTTP
// ============================================================================
// Mapeamento centralizado dos kinds de erro para códigos HTTP e corpo JSON.

use axum::{http::StatusCode, response::Json};
use serde_json::json;

use crate::domain::errors::DomainError;

pub type ErrorResponse = (StatusCode, Json<serde_json::Value>);

pub fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::BadRequest(_) => StatusCode::BAD_REQUEST,
        DomainError::Unauthorized | DomainError::SessionTokenInvalid(_) => {
            StatusCode::UNAUTHORIZED
        }
        DomainError::Forbidden(_) | DomainError::StillAlive(_) | DomainError::AlreadyExists(_) => {
            StatusCode::FORBIDDEN
        }
        DomainError::NotFound(_) | DomainError::AmbiguousChoice(_) => StatusCode::NOT_FOUND,
        DomainError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        DomainError::ApiConnection(_) => StatusCode::GATEWAY_TIMEOUT,
        DomainError::LeaseUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        DomainError::JwksRetrieval(_) | DomainError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn map_domain_error(error: &DomainError) -> ErrorResponse {
    (
        status_for(error),
        Json(json!({"Code": error.code(), "Message": error.to_string()})),
    )
}

/// Same mapping, with the API operation recorded in the body.
pub fn map_domain_error_with_op(error: &DomainError, op: &str) -> ErrorResponse {
    (
        status_for(error),
        Json(json!({"Code": error.code(), "Op": op, "Message": error.to_string()})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_table() {
        assert_eq!(
            status_for(&DomainError::BadRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&DomainError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&DomainError::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&DomainError::StillAlive("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&DomainError::AlreadyExists("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&DomainError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DomainError::AmbiguousChoice("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DomainError::MethodNotAllowed("x".into())),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            status_for(&DomainError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_carries_code_and_op() {
        let (status, body) =
            map_domain_error_with_op(&DomainError::NotFound("no JWKS".into()), "wellknownapi.JWKS");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0["Code"], "not found");
        assert_eq!(body.0["Op"], "wellknownapi.JWKS");
    }
}
