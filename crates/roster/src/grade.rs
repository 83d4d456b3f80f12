use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{CitizenId, Entity, GradeId, Name, OrganizationId};

use crate::isolation::{CrossTenantViolation, VerifiedCitizens};

/// A class grouping of citizens within one organization.
///
/// `citizens` only ever grows through [`VerifiedCitizens`] issued for the
/// grade's own organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub id: GradeId,
    pub organization_id: OrganizationId,
    pub name: Name,
    pub citizens: BTreeSet<CitizenId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grade {
    pub fn new(organization_id: OrganizationId, name: Name, now: DateTime<Utc>) -> Self {
        Self {
            id: GradeId::new(),
            organization_id,
            name,
            citizens: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rename(&mut self, name: Name, now: DateTime<Utc>) {
        self.name = name;
        self.updated_at = now;
    }

    /// Replace the citizen set.
    pub fn assign(
        &mut self,
        verified: VerifiedCitizens,
        now: DateTime<Utc>,
    ) -> Result<(), CrossTenantViolation> {
        self.check_scope(&verified)?;
        self.citizens = verified.into_ids();
        self.updated_at = now;
        Ok(())
    }

    /// Union the given citizens into the set.
    pub fn add(
        &mut self,
        verified: VerifiedCitizens,
        now: DateTime<Utc>,
    ) -> Result<(), CrossTenantViolation> {
        self.check_scope(&verified)?;
        self.citizens.extend(verified.into_ids());
        self.updated_at = now;
        Ok(())
    }

    /// Remove citizens from the set. Unknown ids are ignored.
    pub fn remove<'a>(&mut self, ids: impl IntoIterator<Item = &'a CitizenId>, now: DateTime<Utc>) {
        for id in ids {
            self.citizens.remove(id);
        }
        self.updated_at = now;
    }

    fn check_scope(&self, verified: &VerifiedCitizens) -> Result<(), CrossTenantViolation> {
        if verified.organization_id() != self.organization_id {
            return Err(CrossTenantViolation {
                offending: verified.ids().iter().copied().collect(),
            });
        }
        Ok(())
    }
}

impl Entity for Grade {
    type Id = GradeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::isolation::validate_ownership;

    fn grade(org: OrganizationId) -> Grade {
        Grade::new(org, Name::parse("name", "Grade 1").unwrap(), Utc::now())
    }

    fn verified(org: OrganizationId, ids: &[CitizenId]) -> VerifiedCitizens {
        let owners: HashMap<_, _> = ids.iter().map(|id| (*id, org)).collect();
        validate_ownership(&ids.iter().copied().collect(), org, &owners).unwrap()
    }

    #[test]
    fn assign_replaces_and_add_unions() {
        let org = OrganizationId::new();
        let (a, b, c) = (CitizenId::new(), CitizenId::new(), CitizenId::new());
        let mut g = grade(org);

        g.assign(verified(org, &[a, b]), Utc::now()).unwrap();
        g.assign(verified(org, &[b]), Utc::now()).unwrap();
        assert_eq!(g.citizens, BTreeSet::from([b]));

        g.add(verified(org, &[a, c]), Utc::now()).unwrap();
        assert_eq!(g.citizens, BTreeSet::from([a, b, c]));
    }

    #[test]
    fn proof_for_another_org_is_refused() {
        let mut g = grade(OrganizationId::new());
        let id = CitizenId::new();

        let err = g.add(verified(OrganizationId::new(), &[id]), Utc::now()).unwrap_err();
        assert_eq!(err.offending, vec![id]);
        assert!(g.citizens.is_empty());
    }

    #[test]
    fn remove_ignores_unknown_ids() {
        let org = OrganizationId::new();
        let a = CitizenId::new();
        let mut g = grade(org);
        g.add(verified(org, &[a]), Utc::now()).unwrap();

        g.remove(&[CitizenId::new(), a], Utc::now());
        assert!(g.citizens.is_empty());
    }
}
