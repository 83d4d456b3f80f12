use chrono::Utc;
use tracing::{info, instrument, warn};

use cohort_auth::{normalize_email, Principal, Role};
use cohort_core::{InvitationId, OrganizationId};
use cohort_invitations::{check_receiver, Invitation, InvitationError, ReceiverLookup, Response};
use cohort_organizations::Membership;

use super::guard::{find_organization, lock_organization, require_role};
use super::{ServiceError, ServiceResult, Services};
use crate::store::{constraints, InvitationRepository, MembershipRepository, Store, UnitOfWork, UserRepository};

const INVITATION_NOT_FOUND: &str = "Invitation not found.";

impl<S: Store> Services<S> {
    /// Invite the user registered under `receiver_email`. Admin or higher.
    ///
    /// Unknown receivers and existing members produce the same error.
    #[instrument(
        skip(self, principal, receiver_email),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn send_invitation(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        receiver_email: &str,
    ) -> ServiceResult<Invitation> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Admin).await?;

        let email = normalize_email(receiver_email)?;
        let lookup = match tx.find_user_by_email(&email).await? {
            None => ReceiverLookup::Unknown,
            Some(user) => ReceiverLookup::Found {
                user_id: user.id,
                already_member: tx.get_membership(organization_id, user.id).await?.is_some(),
            },
        };
        let receiver_id = check_receiver(lookup)?;

        let invitation = Invitation::new(organization_id, principal.user_id(), receiver_id, Utc::now());
        match tx.insert_invitation(&invitation).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation(constraints::UNIQUE_PENDING_INVITATION) => {
                return Err(InvitationError::Duplicate.into());
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        info!(invitation_id = %invitation.id, "invitation sent");
        Ok(invitation)
    }

    /// Pending invitations of an organization, newest first. Admin or higher.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn list_organization_invitations(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
    ) -> ServiceResult<Vec<Invitation>> {
        let mut tx = self.store.begin().await?;
        find_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Admin).await?;
        Ok(tx.list_pending_for_organization(organization_id).await?)
    }

    /// Pending invitations addressed to the principal, newest first.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id()), err(level = "debug"))]
    pub async fn list_received_invitations(&self, principal: &Principal) -> ServiceResult<Vec<Invitation>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_pending_for_receiver(principal.user_id()).await?)
    }

    /// Accept a pending invitation and join as Member.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), invitation_id = %invitation_id),
        err(level = "debug")
    )]
    pub async fn accept_invitation(
        &self,
        principal: &Principal,
        invitation_id: InvitationId,
    ) -> ServiceResult<Invitation> {
        self.respond(principal, invitation_id, Response::Accept).await
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), invitation_id = %invitation_id),
        err(level = "debug")
    )]
    pub async fn reject_invitation(
        &self,
        principal: &Principal,
        invitation_id: InvitationId,
    ) -> ServiceResult<Invitation> {
        self.respond(principal, invitation_id, Response::Reject).await
    }

    /// Delete an invitation of `organization_id`. Admin or higher.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id, invitation_id = %invitation_id),
        err(level = "debug")
    )]
    pub async fn delete_invitation(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        invitation_id: InvitationId,
    ) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Admin).await?;

        let invitation = tx
            .get_invitation(invitation_id)
            .await?
            .filter(|inv| inv.organization_id == organization_id)
            .ok_or(ServiceError::NotFound(INVITATION_NOT_FOUND))?;

        tx.delete_invitation(invitation.id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn respond(
        &self,
        principal: &Principal,
        invitation_id: InvitationId,
        response: Response,
    ) -> ServiceResult<Invitation> {
        let mut tx = self.store.begin().await?;
        let organization_id = find_invitation(&mut tx, invitation_id).await?.organization_id;

        // Re-read under the organization lock; a concurrent response or
        // deletion may have landed in between.
        lock_organization(&mut tx, organization_id).await?;
        let mut invitation = find_invitation(&mut tx, invitation_id).await?;

        let status = invitation.respond(principal.user_id(), response).inspect_err(|e| {
            if matches!(e, InvitationError::Forbidden) {
                warn!(
                    user_id = %principal.user_id(),
                    invitation_id = %invitation_id,
                    "response attempted by someone other than the receiver"
                );
            }
        })?;

        if response == Response::Accept
            && tx
                .get_membership(organization_id, invitation.receiver_id)
                .await?
                .is_none()
        {
            let membership = Membership::new(organization_id, invitation.receiver_id, Role::Member, Utc::now());
            tx.insert_membership(&membership).await?;
        }

        tx.set_invitation_status(invitation.id, status).await?;
        tx.commit().await?;

        info!(status = %status, "invitation answered");
        Ok(invitation)
    }
}

async fn find_invitation<T: UnitOfWork>(tx: &mut T, id: InvitationId) -> ServiceResult<Invitation> {
    tx.get_invitation(id)
        .await?
        .ok_or(ServiceError::NotFound(INVITATION_NOT_FOUND))
}

#[cfg(test)]
mod tests {
    use cohort_auth::{AuthzError, Role};
    use cohort_core::{InvitationId, OrganizationId};
    use cohort_invitations::{InvitationError, InvitationStatus};

    use crate::services::testing::{register, services};
    use crate::services::ServiceError;

    #[tokio::test]
    async fn sunflower_invitation_flow() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();

        let sent = services
            .send_invitation(&alice, org.id, " BOB@example.com ")
            .await
            .unwrap();
        assert_eq!(sent.status, InvitationStatus::Pending);
        assert_eq!(sent.receiver_id, bob.user_id());

        let received = services.list_received_invitations(&bob).await.unwrap();
        assert_eq!(received, vec![sent.clone()]);

        let accepted = services.accept_invitation(&bob, sent.id).await.unwrap();
        assert_eq!(accepted.status, InvitationStatus::Accepted);

        let members = services.list_members(&bob, org.id).await.unwrap();
        let bob_member = members
            .iter()
            .find(|m| m.user_id == bob.user_id())
            .expect("bob joined");
        assert_eq!(bob_member.role, Role::Member);

        // Terminal invitations drop out of both lists.
        assert!(services.list_received_invitations(&bob).await.unwrap().is_empty());
        assert!(services
            .list_organization_invitations(&alice, org.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_receiver_and_existing_member_look_the_same() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Member).await;

        let unknown = services
            .send_invitation(&alice, org.id, "nobody@example.com")
            .await
            .unwrap_err();
        let member = services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap_err();

        assert_eq!(unknown.to_string(), member.to_string());
        assert!(matches!(unknown, ServiceError::Invitation(InvitationError::CannotSend)));
        assert!(matches!(member, ServiceError::Invitation(InvitationError::CannotSend)));
    }

    #[tokio::test]
    async fn members_cannot_send() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        register(&services, "carol").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Member).await;

        let err = services
            .send_invitation(&bob, org.id, "carol@example.com")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Authz(AuthzError::InsufficientRole { required: Role::Admin })
        ));
    }

    #[tokio::test]
    async fn duplicate_pending_invitation_conflicts_until_answered() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();

        let first = services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap();
        let err = services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invitation(InvitationError::Duplicate)));

        services.reject_invitation(&bob, first.id).await.unwrap();
        services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_create_one_invitation() {
        let services = services();
        let alice = register(&services, "alice").await;
        register(&services, "bob").await;
        let org_id = services.create_organization(&alice, "Sunflower").await.unwrap().id;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let services = services.clone();
                tokio::spawn(async move { services.send_invitation(&alice, org_id, "bob@example.com").await })
            })
            .collect();

        let mut sent = 0;
        let mut duplicates = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => sent += 1,
                Err(ServiceError::Invitation(InvitationError::Duplicate)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((sent, duplicates), (1, 7));
    }

    #[tokio::test]
    async fn only_the_receiver_may_respond_and_only_once() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        let inv = services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap();

        let err = services.accept_invitation(&alice, inv.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invitation(InvitationError::Forbidden)));

        services.accept_invitation(&bob, inv.id).await.unwrap();
        let err = services.accept_invitation(&bob, inv.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invitation(InvitationError::NotPending)));
        let err = services.reject_invitation(&bob, inv.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invitation(InvitationError::NotPending)));

        // The non-receiver check wins over the state check.
        let err = services.reject_invitation(&alice, inv.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invitation(InvitationError::Forbidden)));
    }

    #[tokio::test]
    async fn rejecting_creates_no_membership() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        let inv = services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap();

        let rejected = services.reject_invitation(&bob, inv.id).await.unwrap();
        assert_eq!(rejected.status, InvitationStatus::Rejected);

        let err = services.get_organization(&bob, org.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authz(AuthzError::NotAMember)));
    }

    #[tokio::test]
    async fn accepting_keeps_an_existing_role() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        let inv = services
            .send_invitation(&alice, org.id, "bob@example.com")
            .await
            .unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Admin).await;

        services.accept_invitation(&bob, inv.id).await.unwrap();

        let members = services.list_members(&alice, org.id).await.unwrap();
        let bob_member = members.iter().find(|m| m.user_id == bob.user_id()).unwrap();
        assert_eq!(bob_member.role, Role::Admin);
    }

    #[tokio::test]
    async fn delete_is_scoped_to_the_organization() {
        let services = services();
        let alice = register(&services, "alice").await;
        register(&services, "bob").await;
        let sunflower = services.create_organization(&alice, "Sunflower").await.unwrap();
        let daisy = services.create_organization(&alice, "Daisy").await.unwrap();
        let inv = services
            .send_invitation(&alice, sunflower.id, "bob@example.com")
            .await
            .unwrap();

        let err = services
            .delete_invitation(&alice, daisy.id, inv.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        services.delete_invitation(&alice, sunflower.id, inv.id).await.unwrap();
        assert!(services
            .list_organization_invitations(&alice, sunflower.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let services = services();
        let alice = register(&services, "alice").await;

        assert!(matches!(
            services.accept_invitation(&alice, InvitationId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            services.send_invitation(&alice, OrganizationId::new(), "x@example.com").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
