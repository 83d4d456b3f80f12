use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{CitizenId, Entity, Name, OrganizationId};

/// A child served by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citizen {
    pub id: CitizenId,
    pub organization_id: OrganizationId,
    pub first_name: Name,
    pub last_name: Name,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a citizen's names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitizenUpdate {
    pub first_name: Option<Name>,
    pub last_name: Option<Name>,
}

impl Citizen {
    pub fn new(
        organization_id: OrganizationId,
        first_name: Name,
        last_name: Name,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CitizenId::new(),
            organization_id,
            first_name,
            last_name,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn apply(&mut self, update: CitizenUpdate, now: DateTime<Utc>) {
        if let Some(first_name) = update.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            self.last_name = last_name;
        }
        self.updated_at = now;
    }
}

impl Entity for Citizen {
    type Id = CitizenId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::parse("name", s).unwrap()
    }

    #[test]
    fn partial_update_touches_only_given_fields() {
        let now = Utc::now();
        let mut c = Citizen::new(OrganizationId::new(), name("Ada"), name("Lovelace"), now);

        c.apply(
            CitizenUpdate {
                last_name: Some(name("Byron")),
                ..CitizenUpdate::default()
            },
            now,
        );

        assert_eq!(c.full_name(), "Ada Byron");
    }
}
