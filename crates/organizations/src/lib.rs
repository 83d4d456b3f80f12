//! `cohort-organizations`: organizations, memberships and the last-owner rule.
//!
//! Pure domain: no IO. Storage adapters supply owner counts and persist the
//! resulting changes.

pub mod membership;
pub mod organization;
pub mod safeguard;

pub use membership::{Membership, MembershipKey};
pub use organization::Organization;
pub use safeguard::{guard_last_owner, LastOwnerViolation, MembershipChange};
