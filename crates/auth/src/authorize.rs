use thiserror::Error;

use crate::Role;

/// Authorization failure inside an organization.
///
/// Messages never reveal who else belongs to the organization or which role
/// the caller actually holds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("You are not a member of this organization.")]
    NotAMember,

    #[error("Insufficient permissions. Required: {required} or higher.")]
    InsufficientRole { required: Role },
}

/// Decide whether a caller holding `membership` may act with `required` privileges.
///
/// `membership` is the caller's role in the target organization, or `None` when
/// the caller has no membership there. On success the held role is returned so
/// callers can make follow-up decisions without another lookup.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(membership: Option<Role>, required: Role) -> Result<Role, AuthzError> {
    let held = membership.ok_or(AuthzError::NotAMember)?;
    if held.has_at_least(required) {
        Ok(held)
    } else {
        Err(AuthzError::InsufficientRole { required })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn missing_membership_is_not_a_member() {
        assert_eq!(authorize(None, Role::Member), Err(AuthzError::NotAMember));
    }

    #[test]
    fn member_cannot_act_as_admin() {
        assert_eq!(
            authorize(Some(Role::Member), Role::Admin),
            Err(AuthzError::InsufficientRole { required: Role::Admin })
        );
    }

    #[test]
    fn owner_passes_every_requirement() {
        for required in Role::ALL {
            assert_eq!(authorize(Some(Role::Owner), required), Ok(Role::Owner));
        }
    }

    #[test]
    fn insufficient_role_message_names_only_the_requirement() {
        let msg = authorize(Some(Role::Admin), Role::Owner).unwrap_err().to_string();
        assert_eq!(msg, "Insufficient permissions. Required: owner or higher.");
    }

    proptest! {
        /// Holding r2 >= r1 always passes a check for r1.
        #[test]
        fn higher_roles_pass_lower_checks(
            held in prop::sample::select(Role::ALL.to_vec()),
            required in prop::sample::select(Role::ALL.to_vec()),
        ) {
            let outcome = authorize(Some(held), required);
            if held >= required {
                prop_assert_eq!(outcome, Ok(held));
            } else {
                prop_assert_eq!(outcome, Err(AuthzError::InsufficientRole { required }));
            }
        }
    }
}
