use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};

use cohort_core::{OrganizationId, UserId};
use cohort_infra::{Services, Store};

use crate::app::errors::{parse_id, service_error_to_response, ApiResult};
use crate::app::dto;
use crate::app::routes::{citizens, grades, invitations};
use crate::context::PrincipalContext;

pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/", post(create_organization::<S>).get(list_organizations::<S>))
        .route(
            "/:org",
            get(get_organization::<S>)
                .patch(update_organization::<S>)
                .delete(delete_organization::<S>),
        )
        .route("/:org/members", get(list_members::<S>))
        .route(
            "/:org/members/:user",
            patch(update_member_role::<S>).delete(remove_member::<S>),
        )
        .route(
            "/:org/invitations",
            post(invitations::send::<S>).get(invitations::list_for_organization::<S>),
        )
        .route("/:org/invitations/:inv", delete(invitations::delete::<S>))
        .route(
            "/:org/citizens",
            post(citizens::create::<S>).get(citizens::list::<S>),
        )
        .route("/:org/grades", post(grades::create::<S>).get(grades::list::<S>))
}

pub async fn create_organization<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::NameRequest>,
) -> ApiResult {
    let org = services
        .create_organization(principal.principal(), &body.name)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(dto::organization_to_json(&org))).into_response())
}

pub async fn list_organizations<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    let orgs = services
        .list_organizations(principal.principal())
        .await
        .map_err(service_error_to_response)?;
    let items = orgs.iter().map(dto::organization_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn get_organization<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let org = services
        .get_organization(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::organization_to_json(&org)).into_response())
}

pub async fn update_organization<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
    Json(body): Json<dto::NameRequest>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let org = services
        .update_organization(principal.principal(), org, &body.name)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::organization_to_json(&org)).into_response())
}

pub async fn delete_organization<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    services
        .delete_organization(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn list_members<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let members = services
        .list_members(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    let items = members.iter().map(dto::member_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn update_member_role<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org, user)): Path<(String, String)>,
    Json(body): Json<dto::UpdateMemberRoleRequest>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let user: UserId = parse_id(&user, "user id")?;
    let member = services
        .update_member_role(principal.principal(), org, user, &body.role)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::member_to_json(&member)).into_response())
}

pub async fn remove_member<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((org, user)): Path<(String, String)>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let user: UserId = parse_id(&user, "user id")?;
    services
        .remove_member(principal.principal(), org, user)
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
