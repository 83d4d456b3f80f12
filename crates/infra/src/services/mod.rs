//! Application services.
//!
//! Every operation follows the same pipeline inside one unit of work:
//!
//! ```text
//! begin
//!   ↓
//! 1. Resolve the target (404 when missing)
//!   ↓
//! 2. Lock the organization (writes only)
//!   ↓
//! 3. Authorize the principal in that organization (403)
//!   ↓
//! 4. Check invariants against state read under the lock (400 / 409)
//!   ↓
//! 5. Mutate, commit
//! ```
//!
//! Principals and organizations are always explicit parameters; nothing is
//! read from ambient request state.

use std::sync::Arc;

use thiserror::Error;

use cohort_auth::{AuthzError, UnknownRole};
use cohort_core::DomainError;
use cohort_invitations::InvitationError;
use cohort_organizations::LastOwnerViolation;
use cohort_roster::CrossTenantViolation;

use crate::store::{Store, StoreError};

mod guard;
mod invitations;
mod organizations;
mod pictograms;
mod roster;
mod users;

pub use organizations::Member;
pub use roster::CitizenChanges;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Authz(#[from] AuthzError),

    /// Refused regardless of role.
    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Invitation(#[from] InvitationError),

    #[error(transparent)]
    CrossTenant(#[from] CrossTenantViolation),

    #[error(transparent)]
    LastOwner(#[from] LastOwnerViolation),

    #[error("{0}")]
    Conflict(String),

    /// Storage fault. Never a client error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
        }
    }
}

impl From<UnknownRole> for ServiceError {
    fn from(err: UnknownRole) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Entry point for all operations, generic over the storage backend.
pub struct Services<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for Services<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> Services<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
