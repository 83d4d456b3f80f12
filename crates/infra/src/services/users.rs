use tracing::{info, instrument};

use cohort_auth::{Principal, ProfileUpdate, Registration, User};
use cohort_organizations::{guard_last_owner, MembershipChange};

use super::{ServiceError, ServiceResult, Services};
use crate::store::{constraints, MembershipRepository, OrganizationRepository, Store, UnitOfWork, UserRepository};

const USER_NOT_FOUND: &str = "User not found.";

impl<S: Store> Services<S> {
    /// Create a user record. Open to unauthenticated callers.
    #[instrument(skip(self, registration), fields(username = %registration.username.trim()), err(level = "debug"))]
    pub async fn register_user(&self, registration: Registration) -> ServiceResult<User> {
        let user = registration.into_user()?;

        let mut tx = self.store.begin().await?;
        match tx.insert_user(&user).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation(constraints::UNIQUE_USERNAME) => {
                return Err(ServiceError::Conflict(format!(
                    "Username '{}' is already taken.",
                    user.username
                )));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// The principal's own profile.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id()), err(level = "debug"))]
    pub async fn get_user(&self, principal: &Principal) -> ServiceResult<User> {
        let mut tx = self.store.begin().await?;
        tx.get_user(principal.user_id())
            .await?
            .ok_or(ServiceError::NotFound(USER_NOT_FOUND))
    }

    #[instrument(skip(self, principal, update), fields(user_id = %principal.user_id()), err(level = "debug"))]
    pub async fn update_profile(&self, principal: &Principal, update: ProfileUpdate) -> ServiceResult<User> {
        let update = update.normalized()?;

        let mut tx = self.store.begin().await?;
        let mut user = tx
            .get_user(principal.user_id())
            .await?
            .ok_or(ServiceError::NotFound(USER_NOT_FOUND))?;
        user.apply(update);
        tx.update_user(&user).await?;
        tx.commit().await?;
        Ok(user)
    }

    /// Delete the principal's account with its memberships and invitations.
    ///
    /// Refused while the principal is the last Owner of any organization.
    /// Organizations are locked in id order before their owner counts are read.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id()), err(level = "debug"))]
    pub async fn delete_user(&self, principal: &Principal) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        require_user(&mut tx, principal).await?;

        for held in tx.list_memberships_for_user(principal.user_id()).await? {
            let organization_id = held.organization_id();
            if tx.lock_organization(organization_id).await?.is_none() {
                continue;
            }
            let Some(membership) = tx.get_membership(organization_id, principal.user_id()).await? else {
                continue;
            };
            let owners = tx.count_owners(organization_id).await?;
            guard_last_owner(&membership, MembershipChange::Remove, owners)?;
        }

        tx.delete_user(principal.user_id()).await?;
        tx.commit().await?;

        info!("user deleted");
        Ok(())
    }
}

/// Resolve the principal's user record inside `tx`.
pub(super) async fn require_user<T: UnitOfWork>(tx: &mut T, principal: &Principal) -> ServiceResult<User> {
    tx.get_user(principal.user_id())
        .await?
        .ok_or(ServiceError::NotFound(USER_NOT_FOUND))
}

#[cfg(test)]
mod tests {
    use cohort_auth::{Principal, ProfileUpdate, Registration, Role};
    use cohort_core::UserId;

    use crate::services::testing::{register, services};
    use crate::services::ServiceError;

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let services = services();
        register(&services, "alice").await;

        let err = services
            .register_user(Registration {
                username: " alice ".to_string(),
                ..Registration::default()
            })
            .await
            .unwrap_err();

        match err {
            ServiceError::Conflict(msg) => assert_eq!(msg, "Username 'alice' is already taken."),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_username_is_rejected() {
        let services = services();
        let err = services
            .register_user(Registration {
                username: "   ".to_string(),
                ..Registration::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn profile_update_normalizes_email() {
        let services = services();
        let alice = register(&services, "alice").await;

        let user = services
            .update_profile(
                &alice,
                ProfileUpdate {
                    email: Some("  New@Example.ORG ".to_string()),
                    first_name: Some(" Alice ".to_string()),
                    last_name: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(user.email, "new@example.org");
        assert_eq!(user.first_name, "Alice");
        assert_eq!(services.get_user(&alice).await.unwrap(), user);
    }

    #[tokio::test]
    async fn unknown_principal_has_no_profile() {
        let services = services();
        let ghost = Principal::new(UserId::new());
        assert!(matches!(
            services.get_user(&ghost).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn overlong_profile_fields_are_validation_errors() {
        let services = services();
        let alice = register(&services, "alice").await;

        let err = services
            .update_profile(
                &alice,
                ProfileUpdate {
                    first_name: Some("a".repeat(151)),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = services
            .register_user(Registration {
                username: "bob".to_string(),
                email: Some(format!("{}@example.com", "b".repeat(250))),
                ..Registration::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn sole_owner_cannot_delete_account() {
        let services = services();
        let alice = register(&services, "alice").await;
        services.create_organization(&alice, "Sunflower").await.unwrap();

        let err = services.delete_user(&alice).await.unwrap_err();
        assert!(matches!(err, ServiceError::LastOwner(_)));
        assert!(services.get_user(&alice).await.is_ok());
    }

    #[tokio::test]
    async fn delete_user_removes_memberships_and_invitations() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let carol = register(&services, "carol").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Admin).await;
        services
            .send_invitation(&bob, org.id, "carol@example.com")
            .await
            .unwrap();

        services.delete_user(&bob).await.unwrap();

        assert!(matches!(services.get_user(&bob).await, Err(ServiceError::NotFound(_))));
        let members = services.list_members(&alice, org.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, alice.user_id());
        assert!(services.list_received_invitations(&carol).await.unwrap().is_empty());

        // The username is free again.
        register(&services, "bob").await;
    }

    #[tokio::test]
    async fn co_owner_may_delete_account() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Owner).await;

        services.delete_user(&bob).await.unwrap();

        let members = services.list_members(&alice, org.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, Role::Owner);
    }

    #[tokio::test]
    async fn deleting_an_unknown_user_is_not_found() {
        let services = services();
        let ghost = Principal::new(UserId::new());
        assert!(matches!(
            services.delete_user(&ghost).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
