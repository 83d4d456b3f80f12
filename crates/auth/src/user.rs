//! User identity records.
//!
//! Users exist independently of organizations. Credentials are handled by
//! whatever issues tokens; this module only models profile data.

use serde::{Deserialize, Serialize};

use cohort_core::{DomainError, DomainResult, Entity, UserId};

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 150;

/// Longest accepted email, matching `users.email`.
pub const MAX_EMAIL_LEN: usize = 254;

/// Longest accepted first or last name, matching `users.first_name`/`last_name`.
pub const MAX_PERSON_NAME_LEN: usize = 150;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Normalized (trimmed, lowercased) email; empty when not provided.
    /// Not unique across users.
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    /// Full name when one is set, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    /// Apply a validated profile update. `None` fields are left untouched.
    pub fn apply(&mut self, update: ProfileUpdate) {
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(first_name) = update.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            self.last_name = last_name;
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Registration input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Registration {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Registration {
    /// Validate and normalize into a new [`User`] with a fresh id.
    ///
    /// Username uniqueness is a storage concern and is not checked here.
    pub fn into_user(self) -> DomainResult<User> {
        let username = normalize_username(&self.username)?;
        let email = match self.email {
            Some(raw) => normalize_email(&raw)?,
            None => String::new(),
        };

        Ok(User {
            id: UserId::new(),
            username,
            email,
            first_name: normalize_person_name("first_name", &self.first_name)?,
            last_name: normalize_person_name("last_name", &self.last_name)?,
        })
    }
}

/// Partial profile update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl ProfileUpdate {
    pub fn normalized(self) -> DomainResult<Self> {
        Ok(Self {
            email: self.email.as_deref().map(normalize_email).transpose()?,
            first_name: self
                .first_name
                .map(|s| normalize_person_name("first_name", &s))
                .transpose()?,
            last_name: self
                .last_name
                .map(|s| normalize_person_name("last_name", &s))
                .transpose()?,
        })
    }
}

fn normalize_username(raw: &str) -> DomainResult<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(DomainError::validation("username cannot be blank"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(DomainError::validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("username cannot contain whitespace"));
    }
    Ok(username.to_string())
}

/// Trimmed; may be empty.
fn normalize_person_name(field: &str, raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.chars().count() > MAX_PERSON_NAME_LEN {
        return Err(DomainError::validation(format!(
            "{field} must be at most {MAX_PERSON_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Trim + lowercase. An empty string is accepted and means "no email".
pub fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim();
    if email.is_empty() {
        return Ok(String::new());
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(DomainError::validation(format!(
            "email must be at most {MAX_EMAIL_LEN} characters"
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(email.to_lowercase())
        }
        _ => Err(DomainError::validation("email must be a valid address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(username: &str, email: Option<&str>) -> Registration {
        Registration {
            username: username.to_string(),
            email: email.map(str::to_string),
            ..Registration::default()
        }
    }

    #[test]
    fn registration_normalizes_fields() {
        let user = registration("  alice ", Some(" Alice@Example.COM "))
            .into_user()
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn registration_rejects_blank_username() {
        let err = registration("   ", None).into_user().unwrap_err();
        assert_eq!(err, DomainError::validation("username cannot be blank"));
    }

    #[test]
    fn registration_rejects_bad_email() {
        assert!(registration("bob", Some("bob-at-example")).into_user().is_err());
        assert!(registration("bob", Some("@example.com")).into_user().is_err());
    }

    #[test]
    fn registration_rejects_overlong_fields() {
        let err = registration("erin", Some(format!("{}@example.com", "a".repeat(300)).as_str()))
            .into_user()
            .unwrap_err();
        assert_eq!(err, DomainError::validation("email must be at most 254 characters"));

        let err = Registration {
            first_name: "f".repeat(MAX_PERSON_NAME_LEN + 1),
            ..registration("erin", None)
        }
        .into_user()
        .unwrap_err();
        assert_eq!(err, DomainError::validation("first_name must be at most 150 characters"));

        let ok = Registration {
            last_name: "l".repeat(MAX_PERSON_NAME_LEN),
            ..registration("erin", None)
        }
        .into_user()
        .unwrap();
        assert_eq!(ok.last_name.len(), MAX_PERSON_NAME_LEN);
    }

    #[test]
    fn profile_update_rejects_overlong_fields() {
        let update = ProfileUpdate {
            last_name: Some("l".repeat(MAX_PERSON_NAME_LEN + 1)),
            ..ProfileUpdate::default()
        };
        assert!(matches!(update.normalized(), Err(DomainError::Validation(_))));

        let update = ProfileUpdate {
            email: Some(format!("{}@example.com", "a".repeat(MAX_EMAIL_LEN))),
            ..ProfileUpdate::default()
        };
        assert!(matches!(update.normalized(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut user = registration("carol", None).into_user().unwrap();
        assert_eq!(user.display_name(), "carol");

        user.apply(ProfileUpdate {
            first_name: Some("Carol".to_string()),
            last_name: Some("Danvers".to_string()),
            ..ProfileUpdate::default()
        });
        assert_eq!(user.display_name(), "Carol Danvers");
    }

    #[test]
    fn profile_update_keeps_unset_fields() {
        let mut user = registration("dave", Some("dave@example.com")).into_user().unwrap();
        let update = ProfileUpdate {
            last_name: Some("  Grohl ".to_string()),
            ..ProfileUpdate::default()
        }
        .normalized()
        .unwrap();
        user.apply(update);
        assert_eq!(user.email, "dave@example.com");
        assert_eq!(user.last_name, "Grohl");
    }
}
