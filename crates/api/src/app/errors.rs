use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use cohort_auth::AuthzError;
use cohort_invitations::InvitationError;
use cohort_infra::ServiceError;

/// Handler result: both arms are complete responses.
pub type ApiResult = Result<axum::response::Response, axum::response::Response>;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Authz(e) => {
            let code = match e {
                AuthzError::NotAMember => "not_a_member",
                AuthzError::InsufficientRole { .. } => "insufficient_role",
            };
            json_error(StatusCode::FORBIDDEN, code, e.to_string())
        }
        ServiceError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        ServiceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::Invitation(e) => {
            let (status, code) = match e {
                InvitationError::CannotSend => (StatusCode::BAD_REQUEST, "cannot_send_invitation"),
                InvitationError::Duplicate => (StatusCode::CONFLICT, "duplicate_invitation"),
                InvitationError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
                InvitationError::NotPending => (StatusCode::BAD_REQUEST, "invitation_not_pending"),
            };
            json_error(status, code, e.to_string())
        }
        ServiceError::CrossTenant(e) => {
            json_error(StatusCode::BAD_REQUEST, "cross_tenant_violation", e.to_string())
        }
        ServiceError::LastOwner(e) => json_error(StatusCode::BAD_REQUEST, "last_owner", e.to_string()),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::Store(e) => {
            error!(error = %e, "storage failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path or body identifier, answering 400 on failure.
pub fn parse_id<T: FromStr>(raw: &str, what: &'static str) -> Result<T, axum::response::Response> {
    raw.trim()
        .parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}")))
}

#[cfg(test)]
mod tests {
    use cohort_auth::Role;
    use cohort_core::OrganizationId;
    use cohort_infra::StoreError;
    use cohort_organizations::LastOwnerViolation;

    use super::*;

    fn status(err: ServiceError) -> StatusCode {
        service_error_to_response(err).status()
    }

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(status(AuthzError::NotAMember.into()), StatusCode::FORBIDDEN);
        assert_eq!(
            status(AuthzError::InsufficientRole { required: Role::Owner }.into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(ServiceError::Forbidden("Global pictograms cannot be deleted.")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(ServiceError::NotFound("Grade not found.")), StatusCode::NOT_FOUND);
        assert_eq!(status(InvitationError::CannotSend.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status(InvitationError::Duplicate.into()), StatusCode::CONFLICT);
        assert_eq!(status(InvitationError::Forbidden.into()), StatusCode::FORBIDDEN);
        assert_eq!(status(InvitationError::NotPending.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status(LastOwnerViolation.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status(ServiceError::Conflict("taken".into())), StatusCode::CONFLICT);
    }

    #[test]
    fn storage_faults_are_never_client_errors() {
        for e in [
            StoreError::Backend("connection reset".into()),
            StoreError::ForeignKeyViolation("fk".into()),
            StoreError::UniqueViolation("unique_membership".into()),
        ] {
            assert_eq!(status(e.into()), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_id::<OrganizationId>("not-a-uuid", "organization id").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<OrganizationId>(&OrganizationId::new().to_string(), "organization id").is_ok());
    }
}
