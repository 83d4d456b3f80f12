use std::collections::BTreeSet;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use cohort_core::{CitizenId, GradeId, OrganizationId};
use cohort_infra::{Services, Store};

use crate::app::errors::{parse_id, service_error_to_response, ApiResult};
use crate::app::dto;
use crate::context::PrincipalContext;

/// Grade-addressed routes; organization-scoped ones live under `/organizations`.
pub fn router<S: Store>() -> Router {
    Router::new()
        .route(
            "/:id",
            get(get_grade::<S>)
                .patch(update_grade::<S>)
                .delete(delete_grade::<S>),
        )
        .route("/:id/citizens", post(assign_citizens::<S>))
        .route("/:id/citizens/add", post(add_citizens::<S>))
        .route("/:id/citizens/remove", post(remove_citizens::<S>))
}

pub async fn create<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
    Json(body): Json<dto::NameRequest>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let grade = services
        .create_grade(principal.principal(), org, &body.name)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(dto::grade_to_json(&grade))).into_response())
}

pub async fn list<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(org): Path<String>,
) -> ApiResult {
    let org: OrganizationId = parse_id(&org, "organization id")?;
    let grades = services
        .list_grades(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    let items = grades.iter().map(dto::grade_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn get_grade<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: GradeId = parse_id(&id, "grade id")?;
    let grade = services
        .get_grade(principal.principal(), id)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::grade_to_json(&grade)).into_response())
}

pub async fn update_grade<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::NameRequest>,
) -> ApiResult {
    let id: GradeId = parse_id(&id, "grade id")?;
    let grade = services
        .update_grade(principal.principal(), id, &body.name)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::grade_to_json(&grade)).into_response())
}

pub async fn delete_grade<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: GradeId = parse_id(&id, "grade id")?;
    services
        .delete_grade(principal.principal(), id)
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn assign_citizens<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CitizenIdsRequest>,
) -> ApiResult {
    let id: GradeId = parse_id(&id, "grade id")?;
    let ids = citizen_ids(&body)?;
    let grade = services
        .assign_citizens(principal.principal(), id, ids)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::grade_to_json(&grade)).into_response())
}

pub async fn add_citizens<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CitizenIdsRequest>,
) -> ApiResult {
    let id: GradeId = parse_id(&id, "grade id")?;
    let ids = citizen_ids(&body)?;
    let grade = services
        .add_citizens(principal.principal(), id, ids)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::grade_to_json(&grade)).into_response())
}

pub async fn remove_citizens<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CitizenIdsRequest>,
) -> ApiResult {
    let id: GradeId = parse_id(&id, "grade id")?;
    let ids = citizen_ids(&body)?;
    let grade = services
        .remove_citizens(principal.principal(), id, ids)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::grade_to_json(&grade)).into_response())
}

fn citizen_ids(body: &dto::CitizenIdsRequest) -> Result<BTreeSet<CitizenId>, axum::response::Response> {
    body.citizen_ids
        .iter()
        .map(|raw| parse_id(raw, "citizen id"))
        .collect()
}
