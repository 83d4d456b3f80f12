//! Tenant isolation for grade ↔ citizen links.
//!
//! A grade may only reference citizens of its own organization. Callers resolve
//! the owning organization of every requested citizen (inside the write
//! transaction) and pass the result to [`validate_ownership`], which is the only
//! way to obtain the [`VerifiedCitizens`] that grade mutations accept.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use cohort_core::{CitizenId, OrganizationId};

/// Some requested citizens are foreign to the organization or do not exist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Citizens do not belong to this organization: [{}]", join_ids(.offending))]
pub struct CrossTenantViolation {
    /// Offending ids in ascending order.
    pub offending: Vec<CitizenId>,
}

fn join_ids(ids: &[CitizenId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Citizen ids proven to belong to one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCitizens {
    organization_id: OrganizationId,
    ids: BTreeSet<CitizenId>,
}

impl VerifiedCitizens {
    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn ids(&self) -> &BTreeSet<CitizenId> {
        &self.ids
    }

    pub fn into_ids(self) -> BTreeSet<CitizenId> {
        self.ids
    }
}

/// All-or-nothing ownership check.
///
/// `owners` maps each citizen id that exists to its organization; ids missing
/// from the map are treated as offending, the same as foreign ones.
pub fn validate_ownership(
    requested: &BTreeSet<CitizenId>,
    expected: OrganizationId,
    owners: &HashMap<CitizenId, OrganizationId>,
) -> Result<VerifiedCitizens, CrossTenantViolation> {
    let offending: Vec<CitizenId> = requested
        .iter()
        .filter(|id| owners.get(id) != Some(&expected))
        .copied()
        .collect();

    if !offending.is_empty() {
        return Err(CrossTenantViolation { offending });
    }

    Ok(VerifiedCitizens {
        organization_id: expected,
        ids: requested.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_request_is_trivially_valid() {
        let org = OrganizationId::new();
        let verified = validate_ownership(&BTreeSet::new(), org, &HashMap::new()).unwrap();
        assert!(verified.ids().is_empty());
        assert_eq!(verified.organization_id(), org);
    }

    #[test]
    fn names_foreign_and_missing_ids() {
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();
        let valid = CitizenId::new();
        let foreign = CitizenId::new();
        let ghost = CitizenId::new();

        let owners = HashMap::from([(valid, org_a), (foreign, org_b)]);
        let requested = BTreeSet::from([valid, foreign, ghost]);

        let err = validate_ownership(&requested, org_a, &owners).unwrap_err();
        assert_eq!(err.offending, vec![foreign, ghost]);
    }

    #[test]
    fn message_lists_ids() {
        let id = CitizenId::new();
        let err = CrossTenantViolation { offending: vec![id] };
        assert_eq!(
            err.to_string(),
            format!("Citizens do not belong to this organization: [{id}]")
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Validation passes iff every requested id is owned by the expected org,
        /// and the error names exactly the ids that are not.
        #[test]
        fn offending_set_is_exact(flags in prop::collection::vec(0u8..3, 0..12)) {
            let home = OrganizationId::new();
            let away = OrganizationId::new();
            let mut owners = HashMap::new();
            let mut requested = BTreeSet::new();
            let mut expected_offending = Vec::new();

            for flag in flags {
                let id = CitizenId::new();
                requested.insert(id);
                match flag {
                    0 => { owners.insert(id, home); }
                    1 => { owners.insert(id, away); expected_offending.push(id); }
                    _ => expected_offending.push(id),
                }
            }
            expected_offending.sort();

            match validate_ownership(&requested, home, &owners) {
                Ok(v) => {
                    prop_assert!(expected_offending.is_empty());
                    prop_assert_eq!(v.ids(), &requested);
                }
                Err(e) => prop_assert_eq!(e.offending, expected_offending),
            }
        }
    }
}
