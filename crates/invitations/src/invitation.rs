use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cohort_core::{Entity, InvitationId, OrganizationId, UserId};

/// Lifecycle state of an invitation.
///
/// `Pending -> Accepted` and `Pending -> Rejected` are the only transitions;
/// both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

impl core::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "rejected" => Ok(InvitationStatus::Rejected),
            other => Err(format!("unknown invitation status '{other}'")),
        }
    }
}

/// Receiver's answer to a pending invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Accept,
    Reject,
}

impl Response {
    fn target(self) -> InvitationStatus {
        match self {
            Response::Accept => InvitationStatus::Accepted,
            Response::Reject => InvitationStatus::Rejected,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvitationError {
    /// Receiver unknown or already a member; the two cases share one error.
    #[error("Cannot send invitation.")]
    CannotSend,

    /// A pending invitation for this receiver already exists in the organization.
    #[error("A pending invitation already exists for this user.")]
    Duplicate,

    #[error("Only the receiver can respond.")]
    Forbidden,

    #[error("Invitation is no longer pending.")]
    NotPending,
}

/// An invitation for a user to join an organization as a Member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub organization_id: OrganizationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn new(
        organization_id: OrganizationId,
        sender_id: UserId,
        receiver_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InvitationId::new(),
            organization_id,
            sender_id,
            receiver_id,
            status: InvitationStatus::Pending,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }

    /// Apply the receiver's response.
    ///
    /// The caller check runs before the state check. Returns the new status;
    /// on `Accept` the membership must be materialized in the same transaction.
    pub fn respond(
        &mut self,
        caller: UserId,
        response: Response,
    ) -> Result<InvitationStatus, InvitationError> {
        if caller != self.receiver_id {
            return Err(InvitationError::Forbidden);
        }
        if !self.is_pending() {
            return Err(InvitationError::NotPending);
        }
        self.status = response.target();
        Ok(self.status)
    }
}

impl Entity for Invitation {
    type Id = InvitationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
