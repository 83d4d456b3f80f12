use serde::{Deserialize, Serialize};

use cohort_core::UserId;

/// An authenticated caller.
///
/// Built once per request from verified claims and passed explicitly to every
/// operation. It carries no organization scope: the organization is always a
/// separate argument, and roles are looked up per organization.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    user_id: UserId,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl From<UserId> for Principal {
    fn from(user_id: UserId) -> Self {
        Self::new(user_id)
    }
}
