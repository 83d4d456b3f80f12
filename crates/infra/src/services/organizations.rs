use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use cohort_auth::{Principal, Role};
use cohort_core::{Name, OrganizationId, UserId};
use cohort_organizations::{guard_last_owner, Membership, MembershipChange, Organization};

use super::guard::{find_organization, lock_organization, require_role};
use super::users::require_user;
use super::{ServiceError, ServiceResult, Services};
use crate::store::{MembershipRepository, OrganizationRepository, Store, UnitOfWork, UserRepository};

const MEMBER_NOT_FOUND: &str = "Member not found in this organization.";

/// A membership joined with the member's username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl<S: Store> Services<S> {
    /// Create an organization; the creator becomes its first Owner.
    #[instrument(skip(self, principal, name), fields(user_id = %principal.user_id()), err(level = "debug"))]
    pub async fn create_organization(&self, principal: &Principal, name: &str) -> ServiceResult<Organization> {
        let name = Name::parse("name", name)?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        require_user(&mut tx, principal).await?;

        let org = Organization::new(name, now);
        tx.insert_organization(&org).await?;
        tx.insert_membership(&Membership::founder(org.id, principal.user_id(), now))
            .await?;
        tx.commit().await?;

        info!(organization_id = %org.id, "organization created");
        Ok(org)
    }

    /// Organizations the principal belongs to, by name.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id()), err(level = "debug"))]
    pub async fn list_organizations(&self, principal: &Principal) -> ServiceResult<Vec<Organization>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_organizations_for_user(principal.user_id()).await?)
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn get_organization(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
    ) -> ServiceResult<Organization> {
        let mut tx = self.store.begin().await?;
        let org = find_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Member).await?;
        Ok(org)
    }

    /// Rename. Owner only.
    #[instrument(
        skip(self, principal, name),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn update_organization(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        name: &str,
    ) -> ServiceResult<Organization> {
        let mut tx = self.store.begin().await?;
        let mut org = lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Owner).await?;

        org.rename(Name::parse("name", name)?, Utc::now());
        tx.update_organization(&org).await?;
        tx.commit().await?;
        Ok(org)
    }

    /// Delete the organization and everything scoped to it. Owner only.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn delete_organization(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
    ) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Owner).await?;

        tx.delete_organization(organization_id).await?;
        tx.commit().await?;

        info!("organization deleted");
        Ok(())
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn list_members(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
    ) -> ServiceResult<Vec<Member>> {
        let mut tx = self.store.begin().await?;
        find_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Member).await?;

        let memberships = tx.list_memberships(organization_id).await?;
        let ids: BTreeSet<UserId> = memberships.iter().map(Membership::user_id).collect();
        let users = tx.get_users(&ids).await?;

        Ok(memberships
            .into_iter()
            .map(|m| Member {
                user_id: m.user_id(),
                username: users
                    .get(&m.user_id())
                    .map(|u| u.username.clone())
                    .unwrap_or_default(),
                role: m.role,
                joined_at: m.joined_at,
            })
            .collect())
    }

    /// Change a member's role. Owner only; the last Owner cannot be demoted.
    #[instrument(
        skip(self, principal, role),
        fields(user_id = %principal.user_id(), organization_id = %organization_id, target = %target),
        err(level = "debug")
    )]
    pub async fn update_member_role(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        target: UserId,
        role: &str,
    ) -> ServiceResult<Member> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Owner).await?;

        let role: Role = role.parse()?;
        let membership = tx
            .get_membership(organization_id, target)
            .await?
            .ok_or(ServiceError::NotFound(MEMBER_NOT_FOUND))?;

        let owners = tx.count_owners(organization_id).await?;
        guard_last_owner(&membership, MembershipChange::Assign(role), owners)?;

        tx.update_membership_role(membership.key, role).await?;
        let username = username_of(&mut tx, target).await?;
        tx.commit().await?;

        info!(role = %role, "member role updated");
        Ok(Member {
            user_id: target,
            username,
            role,
            joined_at: membership.joined_at,
        })
    }

    /// Remove a member. Admin or higher; the last Owner cannot be removed.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id, target = %target),
        err(level = "debug")
    )]
    pub async fn remove_member(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        target: UserId,
    ) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Admin).await?;

        let membership = tx
            .get_membership(organization_id, target)
            .await?
            .ok_or(ServiceError::NotFound(MEMBER_NOT_FOUND))?;

        let owners = tx.count_owners(organization_id).await?;
        guard_last_owner(&membership, MembershipChange::Remove, owners)?;

        tx.delete_membership(membership.key).await?;
        tx.commit().await?;

        info!("member removed");
        Ok(())
    }
}

async fn username_of<T: UnitOfWork>(tx: &mut T, user_id: UserId) -> ServiceResult<String> {
    Ok(tx
        .get_user(user_id)
        .await?
        .map(|u| u.username)
        .unwrap_or_default())
}
