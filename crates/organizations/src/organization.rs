use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{Entity, Name, OrganizationId};

/// A school or institution: the tenant boundary.
///
/// Everything tenant-scoped (memberships, invitations, citizens, grades) hangs
/// off exactly one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: Name,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: Name, now: DateTime<Utc>) -> Self {
        Self {
            id: OrganizationId::new(),
            name,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rename(&mut self, name: Name, now: DateTime<Utc>) {
        self.name = name;
        self.updated_at = now;
    }
}

impl Entity for Organization {
    type Id = OrganizationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_bumps_updated_at_only() {
        let t0 = Utc::now();
        let mut org = Organization::new(Name::parse("name", "Sunflower School").unwrap(), t0);
        let t1 = t0 + chrono::Duration::seconds(5);

        org.rename(Name::parse("name", "Sunflower Academy").unwrap(), t1);

        assert_eq!(org.name.as_str(), "Sunflower Academy");
        assert_eq!(org.created_at, t0);
        assert_eq!(org.updated_at, t1);
    }
}
