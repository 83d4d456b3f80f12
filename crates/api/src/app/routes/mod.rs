use axum::{
    routing::{get, post},
    Router,
};

use cohort_infra::Store;

pub mod citizens;
pub mod grades;
pub mod invitations;
pub mod organizations;
pub mod pictograms;
pub mod system;
pub mod users;

/// Router for all authenticated endpoints.
pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route(
            "/users/me",
            get(users::me::<S>)
                .put(users::update_me::<S>)
                .delete(users::delete_me::<S>),
        )
        .route("/invitations/received", get(invitations::list_received::<S>))
        .route("/invitations/:inv/accept", post(invitations::accept::<S>))
        .route("/invitations/:inv/reject", post(invitations::reject::<S>))
        .nest("/organizations", organizations::router::<S>())
        .nest("/citizens", citizens::router::<S>())
        .nest("/grades", grades::router::<S>())
        .nest("/pictograms", pictograms::router::<S>())
}
