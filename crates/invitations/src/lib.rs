//! `cohort-invitations`: the invitation state machine.
//!
//! Pure domain: the pending-uniqueness rule lives in storage and arrives here
//! as [`InvitationError::Duplicate`] after translation.

pub mod eligibility;
pub mod invitation;

pub use eligibility::{check_receiver, ReceiverLookup};
pub use invitation::{Invitation, InvitationError, InvitationStatus, Response};
