//! Receiver eligibility for new invitations.

use cohort_core::UserId;

use crate::InvitationError;

/// What the store found when resolving the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverLookup {
    /// No user matched the lookup key.
    Unknown,
    /// A user matched; `already_member` says whether they belong to the organization.
    Found { user_id: UserId, already_member: bool },
}

/// Decide whether an invitation may be sent to the resolved receiver.
///
/// Both failure cases collapse into [`InvitationError::CannotSend`].
pub fn check_receiver(lookup: ReceiverLookup) -> Result<UserId, InvitationError> {
    match lookup {
        ReceiverLookup::Found {
            user_id,
            already_member: false,
        } => Ok(user_id),
        ReceiverLookup::Unknown | ReceiverLookup::Found { .. } => Err(InvitationError::CannotSend),
    }
}
