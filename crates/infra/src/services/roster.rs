use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use cohort_auth::{Principal, Role};
use cohort_core::{CitizenId, GradeId, Name, OrganizationId};
use cohort_roster::{validate_ownership, Citizen, CitizenUpdate, Grade, VerifiedCitizens};

use super::guard::{find_organization, lock_organization, require_role};
use super::{ServiceError, ServiceResult, Services};
use crate::store::{RosterRepository, Store, UnitOfWork};

const CITIZEN_NOT_FOUND: &str = "Citizen not found.";
const GRADE_NOT_FOUND: &str = "Grade not found.";

/// Raw citizen edit; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitizenChanges {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl CitizenChanges {
    fn parse(self) -> ServiceResult<CitizenUpdate> {
        Ok(CitizenUpdate {
            first_name: self.first_name.map(|s| Name::parse("first_name", s)).transpose()?,
            last_name: self.last_name.map(|s| Name::parse("last_name", s)).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum SetChange {
    Replace,
    Union,
}

impl<S: Store> Services<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Citizens
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(
        skip(self, principal, first_name, last_name),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn create_citizen(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        first_name: &str,
        last_name: &str,
    ) -> ServiceResult<Citizen> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Member).await?;

        let citizen = Citizen::new(
            organization_id,
            Name::parse("first_name", first_name)?,
            Name::parse("last_name", last_name)?,
            Utc::now(),
        );
        tx.insert_citizen(&citizen).await?;
        tx.commit().await?;

        info!(citizen_id = %citizen.id, "citizen created");
        Ok(citizen)
    }

    /// Citizens of an organization by first then last name.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn list_citizens(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
    ) -> ServiceResult<Vec<Citizen>> {
        let mut tx = self.store.begin().await?;
        find_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Member).await?;
        Ok(tx.list_citizens(organization_id).await?)
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), citizen_id = %citizen_id),
        err(level = "debug")
    )]
    pub async fn get_citizen(&self, principal: &Principal, citizen_id: CitizenId) -> ServiceResult<Citizen> {
        let mut tx = self.store.begin().await?;
        let citizen = find_citizen(&mut tx, citizen_id).await?;
        require_role(&mut tx, principal, citizen.organization_id, Role::Member).await?;
        Ok(citizen)
    }

    #[instrument(
        skip(self, principal, changes),
        fields(user_id = %principal.user_id(), citizen_id = %citizen_id),
        err(level = "debug")
    )]
    pub async fn update_citizen(
        &self,
        principal: &Principal,
        citizen_id: CitizenId,
        changes: CitizenChanges,
    ) -> ServiceResult<Citizen> {
        let mut tx = self.store.begin().await?;
        let mut citizen = lock_citizen(&mut tx, principal, citizen_id, Role::Member).await?;

        citizen.apply(changes.parse()?, Utc::now());
        tx.update_citizen(&citizen).await?;
        tx.commit().await?;
        Ok(citizen)
    }

    /// Delete a citizen and drop it from every grade. Admin or higher.
    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), citizen_id = %citizen_id),
        err(level = "debug")
    )]
    pub async fn delete_citizen(&self, principal: &Principal, citizen_id: CitizenId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        lock_citizen(&mut tx, principal, citizen_id, Role::Admin).await?;

        tx.delete_citizen(citizen_id).await?;
        tx.commit().await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grades
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(
        skip(self, principal, name),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn create_grade(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
        name: &str,
    ) -> ServiceResult<Grade> {
        let mut tx = self.store.begin().await?;
        lock_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Admin).await?;

        let grade = Grade::new(organization_id, Name::parse("name", name)?, Utc::now());
        tx.insert_grade(&grade).await?;
        tx.commit().await?;

        info!(grade_id = %grade.id, "grade created");
        Ok(grade)
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), organization_id = %organization_id),
        err(level = "debug")
    )]
    pub async fn list_grades(
        &self,
        principal: &Principal,
        organization_id: OrganizationId,
    ) -> ServiceResult<Vec<Grade>> {
        let mut tx = self.store.begin().await?;
        find_organization(&mut tx, organization_id).await?;
        require_role(&mut tx, principal, organization_id, Role::Member).await?;
        Ok(tx.list_grades(organization_id).await?)
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), grade_id = %grade_id),
        err(level = "debug")
    )]
    pub async fn get_grade(&self, principal: &Principal, grade_id: GradeId) -> ServiceResult<Grade> {
        let mut tx = self.store.begin().await?;
        let grade = find_grade(&mut tx, grade_id).await?;
        require_role(&mut tx, principal, grade.organization_id, Role::Member).await?;
        Ok(grade)
    }

    #[instrument(
        skip(self, principal, name),
        fields(user_id = %principal.user_id(), grade_id = %grade_id),
        err(level = "debug")
    )]
    pub async fn update_grade(&self, principal: &Principal, grade_id: GradeId, name: &str) -> ServiceResult<Grade> {
        let mut tx = self.store.begin().await?;
        let mut grade = lock_grade(&mut tx, principal, grade_id).await?;

        grade.rename(Name::parse("name", name)?, Utc::now());
        tx.update_grade(&grade).await?;
        tx.commit().await?;
        Ok(grade)
    }

    #[instrument(
        skip(self, principal),
        fields(user_id = %principal.user_id(), grade_id = %grade_id),
        err(level = "debug")
    )]
    pub async fn delete_grade(&self, principal: &Principal, grade_id: GradeId) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        lock_grade(&mut tx, principal, grade_id).await?;

        tx.delete_grade(grade_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace the grade's citizens. All ids must belong to the grade's organization.
    #[instrument(
        skip(self, principal, citizen_ids),
        fields(user_id = %principal.user_id(), grade_id = %grade_id, requested = citizen_ids.len()),
        err(level = "debug")
    )]
    pub async fn assign_citizens(
        &self,
        principal: &Principal,
        grade_id: GradeId,
        citizen_ids: BTreeSet<CitizenId>,
    ) -> ServiceResult<Grade> {
        self.change_citizens(principal, grade_id, citizen_ids, SetChange::Replace)
            .await
    }

    /// Add citizens to the grade. All ids must belong to the grade's organization.
    #[instrument(
        skip(self, principal, citizen_ids),
        fields(user_id = %principal.user_id(), grade_id = %grade_id, requested = citizen_ids.len()),
        err(level = "debug")
    )]
    pub async fn add_citizens(
        &self,
        principal: &Principal,
        grade_id: GradeId,
        citizen_ids: BTreeSet<CitizenId>,
    ) -> ServiceResult<Grade> {
        self.change_citizens(principal, grade_id, citizen_ids, SetChange::Union)
            .await
    }

    /// Remove citizens from the grade. Ids not in the grade are ignored.
    #[instrument(
        skip(self, principal, citizen_ids),
        fields(user_id = %principal.user_id(), grade_id = %grade_id, requested = citizen_ids.len()),
        err(level = "debug")
    )]
    pub async fn remove_citizens(
        &self,
        principal: &Principal,
        grade_id: GradeId,
        citizen_ids: BTreeSet<CitizenId>,
    ) -> ServiceResult<Grade> {
        let mut tx = self.store.begin().await?;
        let mut grade = lock_grade(&mut tx, principal, grade_id).await?;

        grade.remove(&citizen_ids, Utc::now());
        tx.update_grade(&grade).await?;
        tx.commit().await?;
        Ok(grade)
    }

    async fn change_citizens(
        &self,
        principal: &Principal,
        grade_id: GradeId,
        citizen_ids: BTreeSet<CitizenId>,
        change: SetChange,
    ) -> ServiceResult<Grade> {
        let mut tx = self.store.begin().await?;
        let mut grade = lock_grade(&mut tx, principal, grade_id).await?;

        let verified = verify_citizens(&mut tx, &citizen_ids, grade.organization_id).await?;
        let now = Utc::now();
        match change {
            SetChange::Replace => grade.assign(verified, now)?,
            SetChange::Union => grade.add(verified, now)?,
        }

        tx.update_grade(&grade).await?;
        tx.commit().await?;
        Ok(grade)
    }
}

async fn find_citizen<T: UnitOfWork>(tx: &mut T, id: CitizenId) -> ServiceResult<Citizen> {
    tx.get_citizen(id)
        .await?
        .ok_or(ServiceError::NotFound(CITIZEN_NOT_FOUND))
}

async fn find_grade<T: UnitOfWork>(tx: &mut T, id: GradeId) -> ServiceResult<Grade> {
    tx.get_grade(id)
        .await?
        .ok_or(ServiceError::NotFound(GRADE_NOT_FOUND))
}

/// Resolve the citizen, lock its organization, authorize, then re-read it
/// under the lock.
async fn lock_citizen<T: UnitOfWork>(
    tx: &mut T,
    principal: &Principal,
    id: CitizenId,
    required: Role,
) -> ServiceResult<Citizen> {
    let organization_id = find_citizen(tx, id).await?.organization_id;
    lock_organization(tx, organization_id).await?;
    require_role(tx, principal, organization_id, required).await?;
    find_citizen(tx, id).await
}

/// Grade mutations always require Admin or higher.
async fn lock_grade<T: UnitOfWork>(tx: &mut T, principal: &Principal, id: GradeId) -> ServiceResult<Grade> {
    let organization_id = find_grade(tx, id).await?.organization_id;
    lock_organization(tx, organization_id).await?;
    require_role(tx, principal, organization_id, Role::Admin).await?;
    find_grade(tx, id).await
}

/// Tenant isolation check, run on ownership read inside `tx`.
async fn verify_citizens<T: UnitOfWork>(
    tx: &mut T,
    requested: &BTreeSet<CitizenId>,
    organization_id: OrganizationId,
) -> ServiceResult<VerifiedCitizens> {
    let owners = tx.resolve_citizen_owners(requested).await?;
    validate_ownership(requested, organization_id, &owners).map_err(|violation| {
        warn!(
            organization_id = %organization_id,
            offending = violation.offending.len(),
            "cross-tenant citizen reference rejected"
        );
        violation.into()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use cohort_auth::{AuthzError, Role};
    use cohort_core::{CitizenId, GradeId};

    use super::CitizenChanges;
    use crate::services::testing::{register, services};
    use crate::services::ServiceError;

    #[tokio::test]
    async fn members_manage_citizens_admins_delete_them() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Member).await;

        let citizen = services
            .create_citizen(&bob, org.id, " Ada ", "Lovelace")
            .await
            .unwrap();
        assert_eq!(citizen.full_name(), "Ada Lovelace");

        let updated = services
            .update_citizen(
                &bob,
                citizen.id,
                CitizenChanges {
                    last_name: Some("Byron".to_string()),
                    ..CitizenChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name(), "Ada Byron");

        let err = services.delete_citizen(&bob, citizen.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Authz(AuthzError::InsufficientRole { required: Role::Admin })
        ));

        services.delete_citizen(&alice, citizen.id).await.unwrap();
        assert!(services.list_citizens(&alice, org.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn citizens_are_listed_by_name() {
        let services = services();
        let alice = register(&services, "alice").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        for (first, last) in [("Grace", "Hopper"), ("Ada", "Lovelace"), ("Ada", "Byron")] {
            services.create_citizen(&alice, org.id, first, last).await.unwrap();
        }

        let names: Vec<String> = services
            .list_citizens(&alice, org.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.full_name())
            .collect();
        assert_eq!(names, ["Ada Byron", "Ada Lovelace", "Grace Hopper"]);
    }

    #[tokio::test]
    async fn foreign_citizen_is_found_then_denied() {
        let services = services();
        let alice = register(&services, "alice").await;
        let mallory = register(&services, "mallory").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        let citizen = services
            .create_citizen(&alice, org.id, "Ada", "Lovelace")
            .await
            .unwrap();

        let err = services.get_citizen(&mallory, citizen.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authz(AuthzError::NotAMember)));

        let err = services.get_citizen(&mallory, CitizenId::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn cross_tenant_assignment_is_all_or_nothing() {
        let services = services();
        let alice = register(&services, "alice").await;
        let sunflower = services.create_organization(&alice, "Sunflower").await.unwrap();
        let daisy = services.create_organization(&alice, "Daisy").await.unwrap();

        let ours = services
            .create_citizen(&alice, sunflower.id, "Ada", "Lovelace")
            .await
            .unwrap();
        let theirs = services
            .create_citizen(&alice, daisy.id, "Grace", "Hopper")
            .await
            .unwrap();
        let grade = services.create_grade(&alice, sunflower.id, "First").await.unwrap();

        let err = services
            .assign_citizens(&alice, grade.id, [ours.id, theirs.id].into())
            .await
            .unwrap_err();
        match err {
            ServiceError::CrossTenant(violation) => assert_eq!(violation.offending, vec![theirs.id]),
            other => panic!("expected cross-tenant violation, got {other:?}"),
        }
        assert!(services.get_grade(&alice, grade.id).await.unwrap().citizens.is_empty());

        let ghost = CitizenId::new();
        let err = services
            .add_citizens(&alice, grade.id, [ours.id, ghost].into())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(&ghost.to_string()));
        assert!(services.get_grade(&alice, grade.id).await.unwrap().citizens.is_empty());
    }

    #[tokio::test]
    async fn assign_replaces_add_unions_remove_subtracts() {
        let services = services();
        let alice = register(&services, "alice").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        let grade = services.create_grade(&alice, org.id, "First").await.unwrap();

        let mut ids = Vec::new();
        for first in ["Ada", "Grace", "Barbara"] {
            ids.push(services.create_citizen(&alice, org.id, first, "X").await.unwrap().id);
        }

        let g = services
            .assign_citizens(&alice, grade.id, [ids[0], ids[1]].into())
            .await
            .unwrap();
        assert_eq!(g.citizens, BTreeSet::from([ids[0], ids[1]]));

        let g = services
            .assign_citizens(&alice, grade.id, [ids[2]].into())
            .await
            .unwrap();
        assert_eq!(g.citizens, BTreeSet::from([ids[2]]));

        let g = services
            .add_citizens(&alice, grade.id, [ids[0]].into())
            .await
            .unwrap();
        assert_eq!(g.citizens, BTreeSet::from([ids[0], ids[2]]));

        // Removal is not ownership-checked; unknown ids are ignored.
        let g = services
            .remove_citizens(&alice, grade.id, [ids[0], CitizenId::new()].into())
            .await
            .unwrap();
        assert_eq!(g.citizens, BTreeSet::from([ids[2]]));

        services.delete_citizen(&alice, ids[2]).await.unwrap();
        assert!(services.get_grade(&alice, grade.id).await.unwrap().citizens.is_empty());
    }

    #[tokio::test]
    async fn grade_mutations_require_admin() {
        let services = services();
        let alice = register(&services, "alice").await;
        let bob = register(&services, "bob").await;
        let org = services.create_organization(&alice, "Sunflower").await.unwrap();
        services.add_member_for_tests(org.id, bob.user_id(), Role::Member).await;

        let err = services.create_grade(&bob, org.id, "First").await.unwrap_err();
        assert!(matches!(err, ServiceError::Authz(AuthzError::InsufficientRole { .. })));

        let grade = services.create_grade(&alice, org.id, "First").await.unwrap();
        assert_eq!(services.list_grades(&bob, org.id).await.unwrap(), vec![grade.clone()]);

        let err = services.update_grade(&bob, grade.id, "Second").await.unwrap_err();
        assert!(matches!(err, ServiceError::Authz(AuthzError::InsufficientRole { .. })));

        let renamed = services.update_grade(&alice, grade.id, "Second").await.unwrap();
        assert_eq!(renamed.name.as_str(), "Second");

        services.delete_grade(&alice, grade.id).await.unwrap();
        assert!(matches!(
            services.delete_grade(&alice, grade.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            services.get_grade(&alice, GradeId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
