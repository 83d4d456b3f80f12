//! Pictograms: named images shown to citizens.
//!
//! A pictogram either belongs to one organization or is global (shared by all
//! organizations). Listing for an organization yields the global catalog plus
//! that organization's own pictograms, never another tenant's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{DomainError, DomainResult, Entity, Name, OrganizationId, PictogramId};

/// Longest accepted image URL, matching `pictograms.image_url`.
pub const MAX_IMAGE_URL_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pictogram {
    pub id: PictogramId,
    /// `None` for global pictograms.
    pub organization_id: Option<OrganizationId>,
    pub name: Name,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

impl Pictogram {
    pub fn new(
        organization_id: Option<OrganizationId>,
        name: Name,
        image_url: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id: PictogramId::new(),
            organization_id,
            name,
            image_url: parse_image_url(image_url)?,
            created_at: now,
        })
    }

    pub fn is_global(&self) -> bool {
        self.organization_id.is_none()
    }

    /// Whether the pictogram is listed for `organization_id` (`None` lists the
    /// global catalog only).
    pub fn visible_in(&self, organization_id: Option<OrganizationId>) -> bool {
        match self.organization_id {
            None => true,
            Some(owner) => Some(owner) == organization_id,
        }
    }
}

impl Entity for Pictogram {
    type Id = PictogramId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Trimmed absolute `http`/`https` URL of at most [`MAX_IMAGE_URL_LEN`] characters.
pub fn parse_image_url(raw: &str) -> DomainResult<String> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(DomainError::validation("image_url is required"));
    }
    if url.chars().count() > MAX_IMAGE_URL_LEN {
        return Err(DomainError::validation(format!(
            "image_url must be at most {MAX_IMAGE_URL_LEN} characters"
        )));
    }
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .unwrap_or_default();
    if host.is_empty() || url.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("image_url must be an absolute http(s) URL"));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pictogram(organization_id: Option<OrganizationId>) -> Pictogram {
        Pictogram::new(
            organization_id,
            Name::parse("name", "Happy Face").unwrap(),
            "https://example.com/happy.png",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn global_pictograms_are_visible_everywhere() {
        let p = pictogram(None);
        assert!(p.is_global());
        assert!(p.visible_in(None));
        assert!(p.visible_in(Some(OrganizationId::new())));
    }

    #[test]
    fn owned_pictograms_stay_in_their_organization() {
        let org = OrganizationId::new();
        let p = pictogram(Some(org));
        assert!(!p.is_global());
        assert!(p.visible_in(Some(org)));
        assert!(!p.visible_in(Some(OrganizationId::new())));
        assert!(!p.visible_in(None));
    }

    #[test]
    fn image_url_is_required_and_absolute() {
        assert_eq!(
            parse_image_url("  ").unwrap_err(),
            DomainError::validation("image_url is required")
        );
        assert!(parse_image_url("ftp://example.com/a.png").is_err());
        assert!(parse_image_url("https:///a.png").is_err());
        assert!(parse_image_url("https://example.com/a b.png").is_err());
        assert_eq!(
            parse_image_url(" http://example.com/a.png ").unwrap(),
            "http://example.com/a.png"
        );
    }

    #[test]
    fn image_url_is_length_checked() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_IMAGE_URL_LEN));
        assert!(matches!(parse_image_url(&long), Err(DomainError::Validation(_))));
    }
}
