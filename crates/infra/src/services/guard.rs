//! Authorization guard and target resolution shared by all services.

use tracing::warn;

use cohort_auth::{authorize, AuthzError, Principal, Role};
use cohort_core::OrganizationId;
use cohort_organizations::{Membership, Organization};

use super::{ServiceError, ServiceResult};
use crate::store::UnitOfWork;

const ORGANIZATION_NOT_FOUND: &str = "Organization not found.";

/// Require that `principal` holds at least `required` in `organization_id`.
pub(super) async fn require_role<T: UnitOfWork>(
    tx: &mut T,
    principal: &Principal,
    organization_id: OrganizationId,
    required: Role,
) -> ServiceResult<Membership> {
    let membership = tx.get_membership(organization_id, principal.user_id()).await?;

    if let Err(denied) = authorize(membership.as_ref().map(|m| m.role), required) {
        warn!(
            user_id = %principal.user_id(),
            organization_id = %organization_id,
            required = %required,
            "authorization denied: {denied}"
        );
        return Err(denied.into());
    }

    membership.ok_or(ServiceError::Authz(AuthzError::NotAMember))
}

/// Read the organization without locking it.
pub(super) async fn find_organization<T: UnitOfWork>(
    tx: &mut T,
    organization_id: OrganizationId,
) -> ServiceResult<Organization> {
    tx.get_organization(organization_id)
        .await?
        .ok_or(ServiceError::NotFound(ORGANIZATION_NOT_FOUND))
}

/// Take the organization's write lock.
pub(super) async fn lock_organization<T: UnitOfWork>(
    tx: &mut T,
    organization_id: OrganizationId,
) -> ServiceResult<Organization> {
    tx.lock_organization(organization_id)
        .await?
        .ok_or(ServiceError::NotFound(ORGANIZATION_NOT_FOUND))
}
