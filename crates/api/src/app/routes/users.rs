use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use cohort_auth::{ProfileUpdate, Registration};
use cohort_infra::{Services, Store};

use crate::app::errors::{service_error_to_response, ApiResult};
use crate::app::dto;
use crate::context::PrincipalContext;

/// Public: create a user record.
pub async fn register<S: Store>(
    Extension(services): Extension<Services<S>>,
    Json(body): Json<Registration>,
) -> ApiResult {
    let user = services
        .register_user(body)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(dto::user_to_json(&user))).into_response())
}

pub async fn me<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    let user = services
        .get_user(principal.principal())
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::user_to_json(&user)).into_response())
}

pub async fn update_me<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<ProfileUpdate>,
) -> ApiResult {
    let user = services
        .update_profile(principal.principal(), body)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(dto::user_to_json(&user)).into_response())
}

/// Delete the caller's account; refused while they are an organization's last Owner.
pub async fn delete_me<S: Store>(
    Extension(services): Extension<Services<S>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    services
        .delete_user(principal.principal())
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
