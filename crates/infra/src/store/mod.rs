//! Transactional storage boundary.
//!
//! Every application operation runs inside exactly one [`UnitOfWork`] opened by
//! [`Store::begin`]. A unit of work exposes the repositories below and is
//! either committed explicitly or rolled back when dropped.
//!
//! ## Concurrency contract
//!
//! - [`OrganizationRepository::lock_organization`] serializes all writers of one
//!   organization until the unit of work ends. Every mutation of tenant-scoped
//!   data takes this lock before reading the state it validates.
//! - [`RosterRepository::resolve_citizen_owners`] reads ownership inside the
//!   caller's unit of work, so the answer holds until commit.
//! - Uniqueness rules (`unique_membership`, `unique_pending_invitation`,
//!   `unique_username`) are enforced by the store and surface as
//!   [`StoreError::UniqueViolation`] naming the constraint.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use thiserror::Error;

use cohort_auth::{Role, User};
use cohort_core::{CitizenId, GradeId, InvitationId, OrganizationId, PictogramId, UserId};
use cohort_invitations::{Invitation, InvitationStatus};
use cohort_organizations::{Membership, MembershipKey, Organization};
use cohort_roster::{Citizen, Grade, Pictogram};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Names of the uniqueness constraints the store enforces.
pub mod constraints {
    pub const UNIQUE_MEMBERSHIP: &str = "unique_membership";
    pub const UNIQUE_PENDING_INVITATION: &str = "unique_pending_invitation";
    pub const UNIQUE_USERNAME: &str = "unique_username";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key violated: {0}")]
    ForeignKeyViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        matches!(self, StoreError::UniqueViolation(c) if c == constraint)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserRepository: Send {
    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>>;
    async fn update_user(&mut self, user: &User) -> StoreResult<()>;
    async fn get_users(&mut self, ids: &BTreeSet<UserId>) -> StoreResult<HashMap<UserId, User>>;
    /// First user (by username) with this normalized email.
    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>>;
    /// Remove the user and every row referencing it, children first:
    /// memberships, invitations sent or received, user.
    async fn delete_user(&mut self, id: UserId) -> StoreResult<()>;
}

#[async_trait]
pub trait OrganizationRepository: Send {
    async fn insert_organization(&mut self, org: &Organization) -> StoreResult<()>;
    async fn get_organization(&mut self, id: OrganizationId) -> StoreResult<Option<Organization>>;
    /// Like `get_organization`, but also takes the organization's write lock.
    async fn lock_organization(&mut self, id: OrganizationId) -> StoreResult<Option<Organization>>;
    async fn update_organization(&mut self, org: &Organization) -> StoreResult<()>;
    /// Organizations the user holds a membership in, ordered by name.
    async fn list_organizations_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Organization>>;
    /// Remove the organization and everything it owns, children first:
    /// grade links, grades, citizens, pictograms, invitations, memberships,
    /// organization.
    async fn delete_organization(&mut self, id: OrganizationId) -> StoreResult<()>;
}

#[async_trait]
pub trait MembershipRepository: Send {
    async fn get_membership(
        &mut self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>>;
    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()>;
    async fn update_membership_role(&mut self, key: MembershipKey, role: Role) -> StoreResult<()>;
    async fn delete_membership(&mut self, key: MembershipKey) -> StoreResult<()>;
    async fn list_memberships(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Membership>>;
    /// Memberships held by the user, ordered by organization id.
    async fn list_memberships_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Membership>>;
    async fn count_owners(&mut self, organization_id: OrganizationId) -> StoreResult<usize>;
}

#[async_trait]
pub trait InvitationRepository: Send {
    async fn insert_invitation(&mut self, invitation: &Invitation) -> StoreResult<()>;
    async fn get_invitation(&mut self, id: InvitationId) -> StoreResult<Option<Invitation>>;
    async fn set_invitation_status(&mut self, id: InvitationId, status: InvitationStatus) -> StoreResult<()>;
    async fn delete_invitation(&mut self, id: InvitationId) -> StoreResult<()>;
    /// Pending invitations of an organization, newest first.
    async fn list_pending_for_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<Invitation>>;
    /// Pending invitations addressed to a user, newest first.
    async fn list_pending_for_receiver(&mut self, receiver_id: UserId) -> StoreResult<Vec<Invitation>>;
}

#[async_trait]
pub trait RosterRepository: Send {
    async fn insert_citizen(&mut self, citizen: &Citizen) -> StoreResult<()>;
    async fn get_citizen(&mut self, id: CitizenId) -> StoreResult<Option<Citizen>>;
    async fn update_citizen(&mut self, citizen: &Citizen) -> StoreResult<()>;
    /// Deletes the citizen and its grade links.
    async fn delete_citizen(&mut self, id: CitizenId) -> StoreResult<()>;
    async fn list_citizens(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Citizen>>;
    /// Owning organization of each existing id; missing ids are absent from the map.
    async fn resolve_citizen_owners(
        &mut self,
        ids: &BTreeSet<CitizenId>,
    ) -> StoreResult<HashMap<CitizenId, OrganizationId>>;

    async fn insert_grade(&mut self, grade: &Grade) -> StoreResult<()>;
    /// Loads the grade with its citizen set.
    async fn get_grade(&mut self, id: GradeId) -> StoreResult<Option<Grade>>;
    /// Persists name, timestamps and the full citizen set.
    async fn update_grade(&mut self, grade: &Grade) -> StoreResult<()>;
    async fn delete_grade(&mut self, id: GradeId) -> StoreResult<()>;
    async fn list_grades(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Grade>>;
}

#[async_trait]
pub trait PictogramRepository: Send {
    async fn insert_pictogram(&mut self, pictogram: &Pictogram) -> StoreResult<()>;
    async fn get_pictogram(&mut self, id: PictogramId) -> StoreResult<Option<Pictogram>>;
    async fn delete_pictogram(&mut self, id: PictogramId) -> StoreResult<()>;
    /// Global pictograms plus, when `organization_id` is set, that
    /// organization's own; ordered by name.
    async fn list_pictograms(&mut self, organization_id: Option<OrganizationId>) -> StoreResult<Vec<Pictogram>>;
}

/// One atomic transaction over all repositories.
#[async_trait]
pub trait UnitOfWork:
    UserRepository
    + OrganizationRepository
    + MembershipRepository
    + InvitationRepository
    + RosterRepository
    + PictogramRepository
    + Send
{
    async fn commit(self) -> StoreResult<()>;
}

/// Source of units of work.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: UnitOfWork;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

