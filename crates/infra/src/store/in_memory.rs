//! In-memory store (tests/dev).
//!
//! A unit of work holds the store-wide mutex for its whole lifetime and works
//! on a staged copy of every table. `commit` swaps the copy in; dropping the
//! unit of work discards it. Writers are therefore fully serialized, which
//! trivially satisfies the per-organization lock contract.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cohort_auth::{Role, User};
use cohort_core::{CitizenId, Entity, GradeId, InvitationId, OrganizationId, PictogramId, UserId};
use cohort_invitations::{Invitation, InvitationStatus};
use cohort_organizations::{Membership, MembershipKey, Organization};
use cohort_roster::{Citizen, Grade, Pictogram};

use super::{
    constraints, InvitationRepository, MembershipRepository, OrganizationRepository,
    PictogramRepository, RosterRepository, Store, StoreError, StoreResult, UnitOfWork,
    UserRepository,
};

/// Rows keyed by entity id.
#[derive(Debug, Clone)]
struct Table<E: Entity> {
    rows: BTreeMap<E::Id, E>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<E: Entity + Clone> Table<E> {
    fn get(&self, id: &E::Id) -> Option<E> {
        self.rows.get(id).cloned()
    }

    fn contains(&self, id: &E::Id) -> bool {
        self.rows.contains_key(id)
    }

    fn upsert(&mut self, row: E) {
        self.rows.insert(*row.id(), row);
    }

    fn get_mut(&mut self, id: &E::Id) -> Option<&mut E> {
        self.rows.get_mut(id)
    }

    fn remove(&mut self, id: &E::Id) -> Option<E> {
        self.rows.remove(id)
    }

    fn values(&self) -> impl Iterator<Item = &E> {
        self.rows.values()
    }

    fn retain(&mut self, mut keep: impl FnMut(&E) -> bool) {
        self.rows.retain(|_, row| keep(row));
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: Table<User>,
    organizations: Table<Organization>,
    memberships: Table<Membership>,
    invitations: Table<Invitation>,
    citizens: Table<Citizen>,
    grades: Table<Grade>,
    pictograms: Table<Pictogram>,
}

impl Tables {
    fn require_organization(&self, id: OrganizationId) -> StoreResult<()> {
        if self.organizations.contains(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("organization {id} does not exist")))
        }
    }

    fn require_user(&self, id: UserId) -> StoreResult<()> {
        if self.users.contains(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("user {id} does not exist")))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Unit of work over [`InMemoryStore`].
pub struct InMemoryTx {
    committed: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let committed = self.tables.clone().lock_owned().await;
        let staged = committed.clone();
        Ok(InMemoryTx { committed, staged })
    }
}

#[async_trait]
impl UnitOfWork for InMemoryTx {
    async fn commit(mut self) -> StoreResult<()> {
        *self.committed = self.staged;
        Ok(())
    }
}

fn missing(what: &str, id: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{what} {id} does not exist"))
}

#[async_trait]
impl UserRepository for InMemoryTx {
    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        if self.staged.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::UniqueViolation(constraints::UNIQUE_USERNAME.to_string()));
        }
        self.staged.users.upsert(user.clone());
        Ok(())
    }

    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.staged.users.get(&id))
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        let row = self
            .staged
            .users
            .get_mut(&user.id)
            .ok_or_else(|| missing("user", user.id))?;
        *row = user.clone();
        Ok(())
    }

    async fn get_users(&mut self, ids: &BTreeSet<UserId>) -> StoreResult<HashMap<UserId, User>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.users.get(id).map(|u| (*id, u)))
            .collect())
    }

    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .staged
            .users
            .values()
            .filter(|u| !u.email.is_empty() && u.email == email)
            .min_by(|a, b| a.username.cmp(&b.username))
            .cloned())
    }

    async fn delete_user(&mut self, id: UserId) -> StoreResult<()> {
        let t = &mut self.staged;
        t.memberships.retain(|m| m.user_id() != id);
        t.invitations.retain(|i| i.sender_id != id && i.receiver_id != id);
        t.users.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl OrganizationRepository for InMemoryTx {
    async fn insert_organization(&mut self, org: &Organization) -> StoreResult<()> {
        self.staged.organizations.upsert(org.clone());
        Ok(())
    }

    async fn get_organization(&mut self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        Ok(self.staged.organizations.get(&id))
    }

    async fn lock_organization(&mut self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        // The whole store is already locked by this unit of work.
        Ok(self.staged.organizations.get(&id))
    }

    async fn update_organization(&mut self, org: &Organization) -> StoreResult<()> {
        let row = self
            .staged
            .organizations
            .get_mut(&org.id)
            .ok_or_else(|| missing("organization", org.id))?;
        *row = org.clone();
        Ok(())
    }

    async fn list_organizations_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Organization>> {
        let mut orgs: Vec<Organization> = self
            .staged
            .memberships
            .values()
            .filter(|m| m.user_id() == user_id)
            .filter_map(|m| self.staged.organizations.get(&m.organization_id()))
            .collect();
        orgs.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()).then(a.id.cmp(&b.id)));
        Ok(orgs)
    }

    async fn delete_organization(&mut self, id: OrganizationId) -> StoreResult<()> {
        let t = &mut self.staged;
        let doomed: BTreeSet<CitizenId> = t
            .citizens
            .values()
            .filter(|c| c.organization_id == id)
            .map(|c| c.id)
            .collect();
        t.grades.retain(|g| g.organization_id != id);
        for grade in t.grades.rows.values_mut() {
            grade.citizens.retain(|c| !doomed.contains(c));
        }
        t.citizens.retain(|c| c.organization_id != id);
        t.pictograms.retain(|p| p.organization_id != Some(id));
        t.invitations.retain(|i| i.organization_id != id);
        t.memberships.retain(|m| m.organization_id() != id);
        t.organizations.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for InMemoryTx {
    async fn get_membership(
        &mut self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        Ok(self.staged.memberships.get(&MembershipKey {
            organization_id,
            user_id,
        }))
    }

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        self.staged.require_organization(membership.organization_id())?;
        self.staged.require_user(membership.user_id())?;
        if self.staged.memberships.contains(&membership.key) {
            return Err(StoreError::UniqueViolation(constraints::UNIQUE_MEMBERSHIP.to_string()));
        }
        self.staged.memberships.upsert(membership.clone());
        Ok(())
    }

    async fn update_membership_role(&mut self, key: MembershipKey, role: Role) -> StoreResult<()> {
        let row = self
            .staged
            .memberships
            .get_mut(&key)
            .ok_or_else(|| missing("membership for user", key.user_id))?;
        row.role = role;
        Ok(())
    }

    async fn delete_membership(&mut self, key: MembershipKey) -> StoreResult<()> {
        self.staged.memberships.remove(&key);
        Ok(())
    }

    async fn list_memberships(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Membership>> {
        Ok(self
            .staged
            .memberships
            .values()
            .filter(|m| m.organization_id() == organization_id)
            .cloned()
            .collect())
    }

    async fn list_memberships_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Membership>> {
        let mut out: Vec<Membership> = self
            .staged
            .memberships
            .values()
            .filter(|m| m.user_id() == user_id)
            .cloned()
            .collect();
        out.sort_by_key(Membership::organization_id);
        Ok(out)
    }

    async fn count_owners(&mut self, organization_id: OrganizationId) -> StoreResult<usize> {
        Ok(self
            .staged
            .memberships
            .values()
            .filter(|m| m.organization_id() == organization_id && m.role == Role::Owner)
            .count())
    }
}

#[async_trait]
impl InvitationRepository for InMemoryTx {
    async fn insert_invitation(&mut self, invitation: &Invitation) -> StoreResult<()> {
        self.staged.require_organization(invitation.organization_id)?;
        self.staged.require_user(invitation.sender_id)?;
        self.staged.require_user(invitation.receiver_id)?;
        let duplicate = invitation.is_pending()
            && self.staged.invitations.values().any(|i| {
                i.is_pending()
                    && i.receiver_id == invitation.receiver_id
                    && i.organization_id == invitation.organization_id
            });
        if duplicate {
            return Err(StoreError::UniqueViolation(
                constraints::UNIQUE_PENDING_INVITATION.to_string(),
            ));
        }
        self.staged.invitations.upsert(invitation.clone());
        Ok(())
    }

    async fn get_invitation(&mut self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        Ok(self.staged.invitations.get(&id))
    }

    async fn set_invitation_status(&mut self, id: InvitationId, status: InvitationStatus) -> StoreResult<()> {
        let row = self
            .staged
            .invitations
            .get_mut(&id)
            .ok_or_else(|| missing("invitation", id))?;
        row.status = status;
        Ok(())
    }

    async fn delete_invitation(&mut self, id: InvitationId) -> StoreResult<()> {
        self.staged.invitations.remove(&id);
        Ok(())
    }

    async fn list_pending_for_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<Invitation>> {
        Ok(newest_first(
            self.staged
                .invitations
                .values()
                .filter(|i| i.is_pending() && i.organization_id == organization_id),
        ))
    }

    async fn list_pending_for_receiver(&mut self, receiver_id: UserId) -> StoreResult<Vec<Invitation>> {
        Ok(newest_first(
            self.staged
                .invitations
                .values()
                .filter(|i| i.is_pending() && i.receiver_id == receiver_id),
        ))
    }
}

fn newest_first<'a>(rows: impl Iterator<Item = &'a Invitation>) -> Vec<Invitation> {
    let mut out: Vec<Invitation> = rows.cloned().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    out
}

#[async_trait]
impl RosterRepository for InMemoryTx {
    async fn insert_citizen(&mut self, citizen: &Citizen) -> StoreResult<()> {
        self.staged.require_organization(citizen.organization_id)?;
        self.staged.citizens.upsert(citizen.clone());
        Ok(())
    }

    async fn get_citizen(&mut self, id: CitizenId) -> StoreResult<Option<Citizen>> {
        Ok(self.staged.citizens.get(&id))
    }

    async fn update_citizen(&mut self, citizen: &Citizen) -> StoreResult<()> {
        let row = self
            .staged
            .citizens
            .get_mut(&citizen.id)
            .ok_or_else(|| missing("citizen", citizen.id))?;
        *row = citizen.clone();
        Ok(())
    }

    async fn delete_citizen(&mut self, id: CitizenId) -> StoreResult<()> {
        for grade in self.staged.grades.rows.values_mut() {
            grade.citizens.remove(&id);
        }
        self.staged.citizens.remove(&id);
        Ok(())
    }

    async fn list_citizens(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Citizen>> {
        let mut out: Vec<Citizen> = self
            .staged
            .citizens
            .values()
            .filter(|c| c.organization_id == organization_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.first_name.as_str(), a.last_name.as_str())
                .cmp(&(b.first_name.as_str(), b.last_name.as_str()))
        });
        Ok(out)
    }

    async fn resolve_citizen_owners(
        &mut self,
        ids: &BTreeSet<CitizenId>,
    ) -> StoreResult<HashMap<CitizenId, OrganizationId>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.citizens.get(id).map(|c| (*id, c.organization_id)))
            .collect())
    }

    async fn insert_grade(&mut self, grade: &Grade) -> StoreResult<()> {
        self.staged.require_organization(grade.organization_id)?;
        self.staged.grades.upsert(grade.clone());
        Ok(())
    }

    async fn get_grade(&mut self, id: GradeId) -> StoreResult<Option<Grade>> {
        Ok(self.staged.grades.get(&id))
    }

    async fn update_grade(&mut self, grade: &Grade) -> StoreResult<()> {
        if let Some(absent) = grade
            .citizens
            .iter()
            .find(|id| !self.staged.citizens.contains(id))
        {
            return Err(StoreError::ForeignKeyViolation(format!(
                "citizen {absent} does not exist"
            )));
        }
        let row = self
            .staged
            .grades
            .get_mut(&grade.id)
            .ok_or_else(|| missing("grade", grade.id))?;
        *row = grade.clone();
        Ok(())
    }

    async fn delete_grade(&mut self, id: GradeId) -> StoreResult<()> {
        self.staged.grades.remove(&id);
        Ok(())
    }

    async fn list_grades(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Grade>> {
        let mut out: Vec<Grade> = self
            .staged
            .grades
            .values()
            .filter(|g| g.organization_id == organization_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(out)
    }
}

#[async_trait]
impl PictogramRepository for InMemoryTx {
    async fn insert_pictogram(&mut self, pictogram: &Pictogram) -> StoreResult<()> {
        if let Some(organization_id) = pictogram.organization_id {
            self.staged.require_organization(organization_id)?;
        }
        self.staged.pictograms.upsert(pictogram.clone());
        Ok(())
    }

    async fn get_pictogram(&mut self, id: PictogramId) -> StoreResult<Option<Pictogram>> {
        Ok(self.staged.pictograms.get(&id))
    }

    async fn delete_pictogram(&mut self, id: PictogramId) -> StoreResult<()> {
        self.staged.pictograms.remove(&id);
        Ok(())
    }

    async fn list_pictograms(&mut self, organization_id: Option<OrganizationId>) -> StoreResult<Vec<Pictogram>> {
        let mut out: Vec<Pictogram> = self
            .staged
            .pictograms
            .values()
            .filter(|p| p.visible_in(organization_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}
