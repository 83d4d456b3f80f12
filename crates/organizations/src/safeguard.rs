//! Last-owner safeguard.
//!
//! An organization must always keep at least one Owner. Any change that would
//! take the Owner role away from a membership (demotion or removal) is checked
//! against the current Owner count.
//!
//! The count must be read while holding the organization's write lock, in the
//! same transaction as the change; otherwise two concurrent demotions could each
//! observe two Owners and together leave zero.

use thiserror::Error;

use cohort_auth::Role;

use crate::Membership;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Cannot remove or demote the last owner.")]
pub struct LastOwnerViolation;

/// A change that may strip a membership of its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// Set the role to the given value.
    Assign(Role),
    /// Delete the membership.
    Remove,
}

impl MembershipChange {
    /// Does applying this change to `current` leave it without the Owner role?
    pub fn strips_ownership(self, current: Role) -> bool {
        if !current.is_owner() {
            return false;
        }
        match self {
            MembershipChange::Assign(next) => !next.is_owner(),
            MembershipChange::Remove => true,
        }
    }
}

/// Reject `change` when it would leave the organization without an Owner.
///
/// `owner_count` is the number of Owner memberships in the target's
/// organization, counted under the organization lock. Re-assigning Owner to an
/// Owner is a no-op and always allowed.
pub fn guard_last_owner(
    target: &Membership,
    change: MembershipChange,
    owner_count: usize,
) -> Result<(), LastOwnerViolation> {
    if change.strips_ownership(target.role) && owner_count <= 1 {
        return Err(LastOwnerViolation);
    }
    Ok(())
}
