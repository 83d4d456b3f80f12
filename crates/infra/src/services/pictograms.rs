use chrono::Utc;
use tracing::{info, instrument};

use cohort_auth::{Principal, Role};
use cohort_core::{Name, OrganizationId, PictogramId};
use cohort_roster::Pictogram;

use super::guard::{find_organization, lock_organization, require_role};
use super::users::require_user;
use super::{ServiceError, ServiceResult, Services};
use crate::store::{PictogramRepository, Store, UnitOfWork};

const PICTOGRAM_NOT_FOUND: &str = "Pictogram not found.";
const GLOBAL_PICTOGRAM_READ_ONLY: &str = "Global pictograms cannot be deleted.";

impl<S: Store> Services<S> {
    /// Create a pictogram. Organization-owned ones require Admin in that
    /// organization; global ones only require a registered user.
    #[instrument(
        skip(self, principal, name, image_url),
        fields(user_id = %principal.user_id(), organization_id = ?organization_id),
        err(level = "debug")
    )]
    pub async fn create_pictogram(
        &self,
        principal: &Principal,
        organization_id: Option<OrganizationId>,
        name: &str,
        image_url: &str,
    ) -> ServiceResult<Pictogram> {
        let mut tx = self.store.begin().await?;
        match organization_id {
            Some(organization_id) => {
                lock_organization(&mut tx, organization_id).await?;
                require_role(&mut tx, principal, organization_id, Role::Admin).await?;
            }
            None => {
                require_user(&mut tx, principal).await?;
            }
        }

        let pictogram = Pictogram::new(
            organization_id,
            Name::parse("name", name)?,
            image_url,
            Utc::now(),
        )?;
        tx.insert_pictogram(&pictogram).await?;
        tx.commit().await?;

        info!(pictogram_id = %pictogram.id, "pictogram created");
        Ok(pictogram)
    }

    /// Global pictograms, plus the organization's own when one is given (Member
    /// or higher).
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = ?organization_id),
        err(level = "debug")
    )]
    pub async fn list_pictograms(
        &self,
        principal: &Principal,
        organization_id: Option<OrganizationId>,
    ) -> ServiceResult<Vec<Pictogram>> {
        let mut tx = self.store.begin().await?;
        if let Some(organization_id) = organization_id {
            find_organization(&mut tx, organization_id).await?;
            require_role(&mut tx, principal, organization_id, Role::Member).await?;
        }
        Ok(tx.list_pictograms(organization_id).await?)
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), pictogram_id = %pictogram_id),
        err(level = "debug")
    )]
    pub async fn get_pictogram(&self, principal: &Principal, pictogram_id: PictogramId) -> ServiceResult<Pictogram> {
        let mut tx = self.store.begin().await?;
        let pictogram = find_pictogram(&mut tx, pictogram_id).await?;
        if let Some(organization_id) = pictogram.organization_id {
            require_role(&mut tx, principal, organization_id, Role::Member).await?;
        }
        Ok(pictogram)
    }

    /// Delete an organization's pictogram. Admin or higher; global pictograms
    /// are never deleted through the API.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), pictogram_id = %pictogram_id),
        err(level = "debug")
    )]
    pub async fn delete_pictogram(&self, principal: &Principal, pictogram_id: PictogramId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let Some(organization_id) = find_pictogram(&mut tx, pictogram_id).await?.organization_id else {
            return Err(ServiceError::Forbidden(GLOBAL_PICTOGRAM_READ_ONLY));
        };
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Admin).await?;
        find_pictogram(&mut tx, pictogram_id).await?;

        tx.delete_pictogram(pictogram_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn find_pictogram<T: UnitOfWork>(tx: &mut T, id: PictogramId) -> ServiceResult<Pictogram> {
    tx.get_pictogram(id)
        .await?
        .ok_or(ServiceError::NotFound(PICTOGRAM_NOT_FOUND))
}

#[cfg(test)]
mod tests {
    use cohort_auth::{AuthzError, Role};
    use cohort_core::{OrganizationId, PictogramId};

    use crate::services::testing::{register, services};
    use crate::services::ServiceError;

    const URL: &str = "https://example.com/happy.png";

    #[tokio::test]
    async fn organization_pictograms_require_admin() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Member).await;

        let err = services
            .create_pictogram(&bob, Some(org.id), "Happy", URL)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Authz(AuthzError::InsufficientRole { required: Role::Admin })
        ));

        let pictogram = services
            .create_pictogram(&alice, Some(org.id), " Happy ", URL)
            .await
            .unwrap();
        assert_eq!(pictogram.name.as_str(), "Happy");
        assert_eq!(pictogram.organization_id, Some(org.id));

        let err = services.delete_pictogram(&bob, pictogram.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authz(AuthzError::InsufficientRole { .. })));
        services.delete_pictogram(&alice, pictogram.id).await.unwrap();
        assert!(matches!(
            services.get_pictogram(&alice, pictogram.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_merges_global_and_own_organization() {
        let services = services();
        let alice = register(&services, "alice").await;
        let mallory = register(&services, "mallory").await;
        let mine = services.create_organization(&alice, "Sunflower").await.unwrap();
        let theirs = services.create_organization(&mallory, "Oak").await.unwrap();

        services.create_pictogram(&mallory, None, "Sun", URL).await.unwrap();
        services
            .create_pictogram(&alice, Some(mine.id), "Apple", URL)
            .await
            .unwrap();
        let foreign = services
            .create_pictogram(&mallory, Some(theirs.id), "Bus", URL)
            .await
            .unwrap();

        let names: Vec<String> = services
            .list_pictograms(&alice, Some(mine.id))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name.as_str().to_string())
            .collect();
        assert_eq!(names, ["Apple", "Sun"]);
        assert_eq!(services.list_pictograms(&alice, None).await.unwrap().len(), 1);

        assert!(matches!(
            services.list_pictograms(&alice, Some(theirs.id)).await,
            Err(ServiceError::Authz(AuthzError::NotAMember))
        ));
        assert!(matches!(
            services.get_pictogram(&alice, foreign.id).await,
            Err(ServiceError::Authz(AuthzError::NotAMember))
        ));
        assert!(matches!(
            services.create_pictogram(&alice, Some(theirs.id), "Car", URL).await,
            Err(ServiceError::Authz(AuthzError::NotAMember))
        ));
    }

    #[tokio::test]
    async fn global_pictograms_cannot_be_deleted() {
        let services = services();
        let alice = register(&services, "alice").await;
        let global = services.create_pictogram(&alice, None, "Sun", URL).await.unwrap();

        assert!(matches!(
            services.delete_pictogram(&alice, global.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert_eq!(services.get_pictogram(&alice, global.id).await.unwrap(), global);
    }

    #[tokio::test]
    async fn invalid_input_and_unknown_ids() {
        let services = services();
        let alice = register(&services, "alice").await;

        let err = services
            .create_pictogram(&alice, None, "Sun", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = services
            .create_pictogram(&alice, Some(OrganizationId::new()), "Sun", URL)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        assert!(matches!(
            services.delete_pictogram(&alice, PictogramId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn organization_delete_removes_its_pictograms() {
        let services = services();
        let alice = register(&services, "alice").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        let owned = services
            .create_pictogram(&alice, Some(org.id), "Apple", URL)
            .await
            .unwrap();
        let global = services.create_pictogram(&alice, None, "Sun", URL).await.unwrap();

        services.delete_organization(&alice, org.id).await.unwrap();

        assert!(matches!(
            services.get_pictogram(&alice, owned.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(services.list_pictograms(&alice, None).await.unwrap(), vec![global]);
    }
}
