use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_auth::Role;
use cohort_core::{Entity, OrganizationId, UserId};

/// Natural key of a membership: one role per (organization, user).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MembershipKey {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
}

/// Binding of a user to an organization with exactly one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub key: MembershipKey,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(
        organization_id: OrganizationId,
        user_id: UserId,
        role: Role,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: MembershipKey {
                organization_id,
                user_id,
            },
            role,
            joined_at,
        }
    }

    /// Membership granted to whoever creates an organization.
    pub fn founder(organization_id: OrganizationId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self::new(organization_id, user_id, Role::Owner, now)
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.key.organization_id
    }

    pub fn user_id(&self) -> UserId {
        self.key.user_id
    }

    pub fn is_member(&self) -> bool {
        self.role.is_member()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn is_owner(&self) -> bool {
        self.role.is_owner()
    }
}

impl Entity for Membership {
    type Id = MembershipKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founder_is_owner() {
        let m = Membership::founder(OrganizationId::new(), UserId::new(), Utc::now());
        assert!(m.is_owner());
        assert!(m.is_admin());
        assert!(m.is_member());
    }

    #[test]
    fn role_flags_follow_role() {
        let m = Membership::new(OrganizationId::new(), UserId::new(), Role::Admin, Utc::now());
        assert!(m.is_admin());
        assert!(!m.is_owner());
    }
}
