use cohort_auth::Principal;
use cohort_core::UserId;

/// Principal context for a request (authenticated identity).
///
/// Carries no organization: handlers take the organization from the path and
/// pass both explicitly to the services.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id()
    }
}
