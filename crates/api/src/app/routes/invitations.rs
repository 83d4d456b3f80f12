use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use cohort_core::{InvitationId, OrganizationId};
use cohort_infra::{Services, Store};

use crate::app::errors::{parse_id, service_error_to_response, ApiResult};
use crate::app::dto;
use crate::context::PrincipalContext;

pub async fn send<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
    Json(body): Json<dto::SendInvitationRequest>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let inv = services
        .send_invitation(principal.principal(), org, &body.email)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(dto::invitation_to_json(&inv))).into_response())
}

pub async fn list_for_organization<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let invitations = services
        .list_organization_invitations(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    let items = invitations.iter().map(dto::invitation_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn list_received<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    let invitations = services
        .list_received_invitations(principal.principal())
        .await
        .map_err(service_error_to_response)?;
    let items = invitations.iter().map(dto::invitation_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn accept<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(inv): Path<String>,
) -> ApiResult {
    let inv: InvitationId = parse_id(&inv, "invitation id")?;
    let inv = services
        .accept_invitation(principal.principal(), inv)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::invitation_to_json(&inv)).into_response())
}

pub async fn reject<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(inv): Path<String>,
) -> ApiResult {
    let inv: InvitationId = parse_id(&inv, "invitation id")?;
    let inv = services
        .reject_invitation(principal.principal(), inv)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::invitation_to_json(&inv)).into_response())
}

pub async fn delete<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org, inv)): Path<(String, String)>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let inv: InvitationId = parse_id(&inv, "invitation id")?;
    services
        .delete_invitation(principal.principal(), org, inv)
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
