use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use cohort_core::{CitizenId, OrganizationId};
use cohort_infra::services::CitizenChanges;
use cohort_infra::{Services, Store};

use crate::app::errors::{parse_id, service_error_to_response, ApiResult};
use crate::app::dto;
use crate::context::PrincipalContext;

/// Citizen-addressed routes; organization-scoped ones live under `/organizations`.
pub fn router<S: Store>() -> Router {
    Router::new().route(
        "/:id",
        get(get_citizen::<S>)
            .patch(update_citizen::<S>)
            .delete(delete_citizen::<S>),
    )
}

pub async fn create<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
    Json(body): Json<dto::CreateCitizenRequest>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let citizen = services
        .create_citizen(principal.principal(), org, &body.first_name, &body.last_name)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(dto::citizen_to_json(&citizen))).into_response())
}

pub async fn list<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let citizens = services
        .list_citizens(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    let items = citizens.iter().map(dto::citizen_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn get_citizen<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: CitizenId = parse_id(&id, "citizen id")?;
    let citizen = services
        .get_citizen(principal.principal(), id)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::citizen_to_json(&citizen)).into_response())
}

pub async fn update_citizen<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<CitizenChanges>,
) -> ApiResult {
    let id: CitizenId = parse_id(&id, "citizen id")?;
    let citizen = services
        .update_citizen(principal.principal(), id, body)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::citizen_to_json(&citizen)).into_response())
}

pub async fn delete_citizen<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: CitizenId = parse_id(&id, "citizen id")?;
    services
        .delete_citizen(principal.principal(), id)
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
