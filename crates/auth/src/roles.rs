use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role held by a user within one organization.
///
/// Roles form a strict hierarchy: `Member < Admin < Owner`. Every capability
/// granted to a lower role is also granted to the roles above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid role '{0}': must be one of member, admin, owner")]
pub struct UnknownRole(pub String);

impl Role {
    /// All roles, lowest first.
    pub const ALL: [Role; 3] = [Role::Member, Role::Admin, Role::Owner];

    /// Position in the hierarchy (higher grants more).
    pub const fn level(self) -> u8 {
        match self {
            Role::Member => 0,
            Role::Admin => 1,
            Role::Owner => 2,
        }
    }

    /// `true` iff this role grants at least the capabilities of `required`.
    pub const fn has_at_least(self, required: Role) -> bool {
        self.level() >= required.level()
    }

    pub const fn is_member(self) -> bool {
        self.has_at_least(Role::Member)
    }

    pub const fn is_admin(self) -> bool {
        self.has_at_least(Role::Admin)
    }

    pub const fn is_owner(self) -> bool {
        self.has_at_least(Role::Owner)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.level().cmp(&other.level())
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
