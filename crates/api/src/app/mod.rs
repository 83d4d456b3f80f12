//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use cohort_infra::{Services, Store};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router over the given services.
pub fn build_app<S: Store>(services: Services<S>, jwt_secret: &str) -> Router {
    let jwt = Arc::new(cohort_auth::Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a verified principal.
    let protected = routes::router::<S>().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/auth/register", post(routes::users::register::<S>))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
