use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use cohort_core::{OrganizationId, PictogramId};
use cohort_infra::{Services, Store};

use crate::app::errors::{parse_id, service_error_to_response, ApiResult};
use crate::app::dto;
use crate::context::PrincipalContext;

pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/:id", get(get_pictogram::<S>).delete(delete_pictogram::<S>))
}

fn organization_filter(raw: Option<String>) -> Result<Option<OrganizationId>, axum::response::Response> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| parse_id(&s, "organization id"))
        .transpose()
}

pub async fn create<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePictogramRequest>,
) -> ApiResult {
    let org = organization_filter(body.organization_id)?;
    let pictogram = services
        .create_pictogram(principal.principal(), org, &body.name, &body.image_url)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(dto::pictogram_to_json(&pictogram))).into_response())
}

/// `?organization_id=` adds that organization's pictograms to the global ones.
pub async fn list<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PictogramQuery>,
) -> ApiResult {
    let org = organization_filter(query.organization_id)?;
    let pictograms = services
        .list_pictograms(principal.principal(), org)
        .await
        .map_err(service_error_to_response)?;
    let items = pictograms.iter().map(dto::pictogram_to_json).collect();
    Ok(Json(dto::items(items)).into_response())
}

pub async fn get_pictogram<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: PictogramId = parse_id(&id, "pictogram id")?;
    let pictogram = services
        .get_pictogram(principal.principal(), id)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::pictogram_to_json(&pictogram)).into_response())
}

pub async fn delete_pictogram<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: PictogramId = parse_id(&id, "pictogram id")?;
    services
        .delete_pictogram(principal.principal(), id)
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
