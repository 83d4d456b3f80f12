//! Strongly-typed identifiers used across the domain.
//!
//! Every tenant-scoped entity gets its own newtype so that an organization id
//! can never be passed where a citizen id is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an organization (the tenant boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(Uuid);

/// Identifier of a user (actor identity, independent of organizations).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an invitation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationId(Uuid);

/// Identifier of a citizen.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitizenId(Uuid);

/// Identifier of a grade.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradeId(Uuid);

/// Identifier of a pictogram (organization-owned or global).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PictogramId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered), so freshly created ids sort by
            /// creation time.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(OrganizationId, "OrganizationId");
impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(InvitationId, "InvitationId");
impl_uuid_newtype!(CitizenId, "CitizenId");
impl_uuid_newtype!(GradeId, "GradeId");
impl_uuid_newtype!(PictogramId, "PictogramId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_garbage_with_type_name() {
        let err = "not-a-uuid".parse::<CitizenId>().unwrap_err();
        match err {
            DomainError::InvalidId(msg) => assert!(msg.starts_with("CitizenId:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn display_and_parse_agree() {
        let id = GradeId::new();
        let parsed: GradeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let uuid = Uuid::now_v7();
        let id = OrganizationId::from_uuid(uuid);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(uuid.to_string()));
    }

    #[test]
    fn v7_ids_are_time_ordered() {
        let a = UserId::new();
        let b = UserId::new();
        assert!(a <= b);
    }
}
