//! Postgres-backed store.
//!
//! Each unit of work is one database transaction (READ COMMITTED).
//!
//! ## Locking
//!
//! | Operation | Lock |
//! |-----------|------|
//! | `lock_organization` | `SELECT … FOR UPDATE` on the organization row |
//! | `resolve_citizen_owners` | `SELECT … FOR SHARE` on the citizen rows |
//!
//! Writers of tenant-scoped data take the organization lock first, so owner
//! counts, pending-invitation checks and ownership reads are stable until
//! commit.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError |
//! |-----------------------|------------|
//! | `23505` (unique violation) | `UniqueViolation(constraint name)` |
//! | `23503` (foreign key violation) | `ForeignKeyViolation` |
//! | anything else, pool/IO errors | `Backend` |

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use cohort_auth::{Role, User};
use cohort_core::{CitizenId, GradeId, InvitationId, Name, OrganizationId, PictogramId, UserId};
use cohort_invitations::{Invitation, InvitationStatus};
use cohort_organizations::{Membership, MembershipKey, Organization};
use cohort_roster::{Citizen, Grade, Pictogram};

use super::{
    InvitationRepository, MembershipRepository, OrganizationRepository, PictogramRepository,
    RosterRepository, Store, StoreError, StoreResult, UnitOfWork, UserRepository,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx { tx })
    }
}

#[async_trait]
impl UnitOfWork for PostgresTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: UserId::from_uuid(get(row, "id")?),
        username: get(row, "username")?,
        email: get(row, "email")?,
        first_name: get(row, "first_name")?,
        last_name: get(row, "last_name")?,
    })
}

#[async_trait]
impl UserRepository for PostgresTx {
    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, first_name, last_name
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, first_name = $3, last_name = $4
            WHERE id = $1
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;
        Ok(())
    }

    async fn get_users(&mut self, ids: &BTreeSet<UserId>) -> StoreResult<HashMap<UserId, User>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, username, email, first_name, last_name
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_users", e))?;

        rows.iter()
            .map(|row| user_from_row(row).map(|u| (u.id, u)))
            .collect()
    }

    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, first_name, last_name
            FROM users
            WHERE email = $1 AND email <> ''
            ORDER BY username ASC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&mut self, id: UserId) -> StoreResult<()> {
        let steps: [(&str, &str); 3] = [
            ("delete_user_memberships", "DELETE FROM memberships WHERE user_id = $1"),
            (
                "delete_user_invitations",
                "DELETE FROM invitations WHERE sender_id = $1 OR receiver_id = $1",
            ),
            ("delete_user", "DELETE FROM users WHERE id = $1"),
        ];

        for (operation, sql) in steps {
            sqlx::query(sql)
                .bind(id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error(operation, e))?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Organizations
// ─────────────────────────────────────────────────────────────────────────────

fn organization_from_row(row: &PgRow) -> StoreResult<Organization> {
    Ok(Organization {
        id: OrganizationId::from_uuid(get(row, "id")?),
        name: name(row, "name")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

#[async_trait]
impl OrganizationRepository for PostgresTx {
    async fn insert_organization(&mut self, org: &Organization) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(org.id.as_uuid())
        .bind(org.name.as_str())
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_organization", e))?;
        Ok(())
    }

    async fn get_organization(&mut self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, created_at, updated_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_organization", e))?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn lock_organization(&mut self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, created_at, updated_at
            FROM organizations
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_organization", e))?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn update_organization(&mut self, org: &Organization) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET name = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(org.id.as_uuid())
        .bind(org.name.as_str())
        .bind(org.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_organization", e))?;
        Ok(())
    }

    async fn list_organizations_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.name, o.created_at, o.updated_at
            FROM organizations o
            JOIN memberships m ON m.organization_id = o.id
            WHERE m.user_id = $1
            ORDER BY o.name ASC, o.id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_organizations_for_user", e))?;
        rows.iter().map(organization_from_row).collect()
    }

    #[instrument(skip(self), fields(organization_id = %id), err)]
    async fn delete_organization(&mut self, id: OrganizationId) -> StoreResult<()> {
        let steps: [(&str, &str); 7] = [
            (
                "delete_grade_links",
                r#"
                DELETE FROM grade_citizens
                WHERE grade_id IN (SELECT id FROM grades WHERE organization_id = $1)
                   OR citizen_id IN (SELECT id FROM citizens WHERE organization_id = $1)
                "#,
            ),
            ("delete_grades", "DELETE FROM grades WHERE organization_id = $1"),
            ("delete_citizens", "DELETE FROM citizens WHERE organization_id = $1"),
            ("delete_pictograms", "DELETE FROM pictograms WHERE organization_id = $1"),
            ("delete_invitations", "DELETE FROM invitations WHERE organization_id = $1"),
            ("delete_memberships", "DELETE FROM memberships WHERE organization_id = $1"),
            ("delete_organization", "DELETE FROM organizations WHERE id = $1"),
        ];

        for (operation, sql) in steps {
            sqlx::query(sql)
                .bind(id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error(operation, e))?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memberships
// ─────────────────────────────────────────────────────────────────────────────

fn membership_from_row(row: &PgRow) -> StoreResult<Membership> {
    let role: String = get(row, "role")?;
    let role = role
        .parse::<Role>()
        .map_err(|e| StoreError::Backend(format!("corrupt membership row: {e}")))?;
    Ok(Membership {
        key: MembershipKey {
            organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
            user_id: UserId::from_uuid(get(row, "user_id")?),
        },
        role,
        joined_at: get(row, "joined_at")?,
    })
}

#[async_trait]
impl MembershipRepository for PostgresTx {
    async fn get_membership(
        &mut self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(
            r#"
            SELECT organization_id, user_id, role, joined_at
            FROM memberships
            WHERE organization_id = $1 AND user_id = $2
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_membership", e))?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (organization_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(membership.organization_id().as_uuid())
        .bind(membership.user_id().as_uuid())
        .bind(membership.role.as_str())
        .bind(membership.joined_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_membership", e))?;
        Ok(())
    }

    async fn update_membership_role(&mut self, key: MembershipKey, role: Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE memberships
            SET role = $3
            WHERE organization_id = $1 AND user_id = $2
            "#,
        )
        .bind(key.organization_id.as_uuid())
        .bind(key.user_id.as_uuid())
        .bind(role.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_membership_role", e))?;
        Ok(())
    }

    async fn delete_membership(&mut self, key: MembershipKey) -> StoreResult<()> {
        sqlx::query("DELETE FROM memberships WHERE organization_id = $1 AND user_id = $2")
            .bind(key.organization_id.as_uuid())
            .bind(key.user_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_membership", e))?;
        Ok(())
    }

    async fn list_memberships(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, user_id, role, joined_at
            FROM memberships
            WHERE organization_id = $1
            ORDER BY joined_at ASC, user_id ASC
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn list_memberships_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, user_id, role, joined_at
            FROM memberships
            WHERE user_id = $1
            ORDER BY organization_id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_memberships_for_user", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn count_owners(&mut self, organization_id: OrganizationId) -> StoreResult<usize> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS owners
            FROM memberships
            WHERE organization_id = $1 AND role = 'owner'
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("count_owners", e))?;
        let owners: i64 = get(&row, "owners")?;
        Ok(usize::try_from(owners).unwrap_or(0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invitations
// ─────────────────────────────────────────────────────────────────────────────

fn invitation_from_row(row: &PgRow) -> StoreResult<Invitation> {
    let status: String = get(row, "status")?;
    let status = status
        .parse::<InvitationStatus>()
        .map_err(|e| StoreError::Backend(format!("corrupt invitation row: {e}")))?;
    Ok(Invitation {
        id: InvitationId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        sender_id: UserId::from_uuid(get(row, "sender_id")?),
        receiver_id: UserId::from_uuid(get(row, "receiver_id")?),
        status,
        created_at: get(row, "created_at")?,
    })
}

#[async_trait]
impl InvitationRepository for PostgresTx {
    async fn insert_invitation(&mut self, invitation: &Invitation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (id, organization_id, sender_id, receiver_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invitation.id.as_uuid())
        .bind(invitation.organization_id.as_uuid())
        .bind(invitation.sender_id.as_uuid())
        .bind(invitation.receiver_id.as_uuid())
        .bind(invitation.status.as_str())
        .bind(invitation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invitation", e))?;
        Ok(())
    }

    async fn get_invitation(&mut self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, sender_id, receiver_id, status, created_at
            FROM invitations
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_invitation", e))?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn set_invitation_status(&mut self, id: InvitationId, status: InvitationStatus) -> StoreResult<()> {
        sqlx::query("UPDATE invitations SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_invitation_status", e))?;
        Ok(())
    }

    async fn delete_invitation(&mut self, id: InvitationId) -> StoreResult<()> {
        sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_invitation", e))?;
        Ok(())
    }

    async fn list_pending_for_organization(
        &mut self,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<Invitation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, sender_id, receiver_id, status, created_at
            FROM invitations
            WHERE organization_id = $1 AND status = 'pending'
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_pending_for_organization", e))?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn list_pending_for_receiver(&mut self, receiver_id: UserId) -> StoreResult<Vec<Invitation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, sender_id, receiver_id, status, created_at
            FROM invitations
            WHERE receiver_id = $1 AND status = 'pending'
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(receiver_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_pending_for_receiver", e))?;
        rows.iter().map(invitation_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Citizens & grades
// ─────────────────────────────────────────────────────────────────────────────

fn citizen_from_row(row: &PgRow) -> StoreResult<Citizen> {
    Ok(Citizen {
        id: CitizenId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        first_name: name(row, "first_name")?,
        last_name: name(row, "last_name")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn grade_from_row(row: &PgRow, citizens: BTreeSet<CitizenId>) -> StoreResult<Grade> {
    Ok(Grade {
        id: GradeId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        name: name(row, "name")?,
        citizens,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

#[async_trait]
impl RosterRepository for PostgresTx {
    async fn insert_citizen(&mut self, citizen: &Citizen) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO citizens (id, organization_id, first_name, last_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(citizen.id.as_uuid())
        .bind(citizen.organization_id.as_uuid())
        .bind(citizen.first_name.as_str())
        .bind(citizen.last_name.as_str())
        .bind(citizen.created_at)
        .bind(citizen.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_citizen", e))?;
        Ok(())
    }

    async fn get_citizen(&mut self, id: CitizenId) -> StoreResult<Option<Citizen>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, first_name, last_name, created_at, updated_at
            FROM citizens
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_citizen", e))?;
        row.as_ref().map(citizen_from_row).transpose()
    }

    async fn update_citizen(&mut self, citizen: &Citizen) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE citizens
            SET first_name = $2, last_name = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(citizen.id.as_uuid())
        .bind(citizen.first_name.as_str())
        .bind(citizen.last_name.as_str())
        .bind(citizen.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_citizen", e))?;
        Ok(())
    }

    async fn delete_citizen(&mut self, id: CitizenId) -> StoreResult<()> {
        sqlx::query("DELETE FROM grade_citizens WHERE citizen_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_citizen_links", e))?;
        sqlx::query("DELETE FROM citizens WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_citizen", e))?;
        Ok(())
    }

    async fn list_citizens(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Citizen>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, first_name, last_name, created_at, updated_at
            FROM citizens
            WHERE organization_id = $1
            ORDER BY first_name ASC, last_name ASC
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_citizens", e))?;
        rows.iter().map(citizen_from_row).collect()
    }

    async fn resolve_citizen_owners(
        &mut self,
        ids: &BTreeSet<CitizenId>,
    ) -> StoreResult<HashMap<CitizenId, OrganizationId>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id
            FROM citizens
            WHERE id = ANY($1)
            FOR SHARE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("resolve_citizen_owners", e))?;

        rows.iter()
            .map(|row| {
                Ok((
                    CitizenId::from_uuid(get(row, "id")?),
                    OrganizationId::from_uuid(get(row, "organization_id")?),
                ))
            })
            .collect()
    }

    async fn insert_grade(&mut self, grade: &Grade) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grades (id, organization_id, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(grade.id.as_uuid())
        .bind(grade.organization_id.as_uuid())
        .bind(grade.name.as_str())
        .bind(grade.created_at)
        .bind(grade.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_grade", e))?;
        self.write_grade_links(grade).await
    }

    async fn get_grade(&mut self, id: GradeId) -> StoreResult<Option<Grade>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, created_at, updated_at
            FROM grades
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_grade", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let links = sqlx::query("SELECT citizen_id FROM grade_citizens WHERE grade_id = $1")
            .bind(id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_grade_links", e))?;
        let citizens = links
            .iter()
            .map(|r| get(r, "citizen_id").map(CitizenId::from_uuid))
            .collect::<StoreResult<BTreeSet<_>>>()?;

        grade_from_row(&row, citizens).map(Some)
    }

    async fn update_grade(&mut self, grade: &Grade) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE grades
            SET name = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(grade.id.as_uuid())
        .bind(grade.name.as_str())
        .bind(grade.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_grade", e))?;
        self.write_grade_links(grade).await
    }

    async fn delete_grade(&mut self, id: GradeId) -> StoreResult<()> {
        sqlx::query("DELETE FROM grade_citizens WHERE grade_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_grade_links", e))?;
        sqlx::query("DELETE FROM grades WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_grade", e))?;
        Ok(())
    }

    async fn list_grades(&mut self, organization_id: OrganizationId) -> StoreResult<Vec<Grade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, name, created_at, updated_at
            FROM grades
            WHERE organization_id = $1
            ORDER BY name ASC
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_grades", e))?;

        let links = sqlx::query(
            r#"
            SELECT gc.grade_id, gc.citizen_id
            FROM grade_citizens gc
            JOIN grades g ON g.id = gc.grade_id
            WHERE g.organization_id = $1
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_grade_links", e))?;

        let mut by_grade: HashMap<Uuid, BTreeSet<CitizenId>> = HashMap::new();
        for link in &links {
            let grade_id: Uuid = get(link, "grade_id")?;
            let citizen_id: Uuid = get(link, "citizen_id")?;
            by_grade
                .entry(grade_id)
                .or_default()
                .insert(CitizenId::from_uuid(citizen_id));
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = get(row, "id")?;
                grade_from_row(row, by_grade.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

impl PostgresTx {
    /// Replace the link rows of `grade` with its current citizen set.
    async fn write_grade_links(&mut self, grade: &Grade) -> StoreResult<()> {
        sqlx::query("DELETE FROM grade_citizens WHERE grade_id = $1")
            .bind(grade.id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("clear_grade_links", e))?;

        if grade.citizens.is_empty() {
            return Ok(());
        }

        let citizens: Vec<Uuid> = grade.citizens.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO grade_citizens (grade_id, citizen_id)
            SELECT $1, unnest($2::uuid[])
            "#,
        )
        .bind(grade.id.as_uuid())
        .bind(&citizens)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_grade_links", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pictograms
// ─────────────────────────────────────────────────────────────────────────────

fn pictogram_from_row(row: &PgRow) -> StoreResult<Pictogram> {
    let organization_id: Option<Uuid> = get(row, "organization_id")?;
    Ok(Pictogram {
        id: PictogramId::from_uuid(get(row, "id")?),
        organization_id: organization_id.map(OrganizationId::from_uuid),
        name: name(row, "name")?,
        image_url: get(row, "image_url")?,
        created_at: get(row, "created_at")?,
    })
}

#[async_trait]
impl PictogramRepository for PostgresTx {
    async fn insert_pictogram(&mut self, pictogram: &Pictogram) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pictograms (id, organization_id, name, image_url, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(pictogram.id.as_uuid())
        .bind(pictogram.organization_id.map(Uuid::from))
        .bind(pictogram.name.as_str())
        .bind(&pictogram.image_url)
        .bind(pictogram.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_pictogram", e))?;
        Ok(())
    }

    async fn get_pictogram(&mut self, id: PictogramId) -> StoreResult<Option<Pictogram>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, image_url, created_at
            FROM pictograms
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_pictogram", e))?;
        row.as_ref().map(pictogram_from_row).transpose()
    }

    async fn delete_pictogram(&mut self, id: PictogramId) -> StoreResult<()> {
        sqlx::query("DELETE FROM pictograms WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_pictogram", e))?;
        Ok(())
    }

    async fn list_pictograms(&mut self, organization_id: Option<OrganizationId>) -> StoreResult<Vec<Pictogram>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, name, image_url, created_at
            FROM pictograms
            WHERE organization_id IS NULL OR organization_id = $1
            ORDER BY name ASC, id ASC
            "#,
        )
        .bind(organization_id.map(Uuid::from))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_pictograms", e))?;
        rows.iter().map(pictogram_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers & error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to read column {column}: {e}")))
}

fn name(row: &PgRow, column: &'static str) -> StoreResult<Name> {
    let raw: String = get(row, column)?;
    Name::parse(column, raw).map_err(|e| StoreError::Backend(format!("corrupt {column}: {e}")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(
                    db_err.constraint().map(str::to_string).unwrap_or(msg),
                ),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
