//! Request bodies and JSON views of domain records.

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use cohort_auth::User;
use cohort_infra::services::Member;
use cohort_invitations::Invitation;
use cohort_organizations::Organization;
use cohort_roster::{Citizen, Grade, Pictogram};

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Create or rename an organization or grade.
#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct SendInvitationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCitizenRequest {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CitizenIdsRequest {
    pub citizen_ids: Vec<String>,
}

/// Omit `organization_id` for a global pictogram.
#[derive(Debug, Deserialize)]
pub struct CreatePictogramRequest {
    pub name: String,
    pub image_url: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PictogramQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

pub fn items(items: Vec<JsonValue>) -> JsonValue {
    json!({ "items": items })
}

pub fn user_to_json(user: &User) -> JsonValue {
    json!({
        "id": user.id.to_string(),
        "username": user.username,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "display_name": user.display_name(),
    })
}

pub fn organization_to_json(org: &Organization) -> JsonValue {
    json!({
        "id": org.id.to_string(),
        "name": org.name.as_str(),
        "created_at": org.created_at.to_rfc3339(),
        "updated_at": org.updated_at.to_rfc3339(),
    })
}

pub fn member_to_json(member: &Member) -> JsonValue {
    json!({
        "user_id": member.user_id.to_string(),
        "username": member.username,
        "role": member.role.as_str(),
        "joined_at": member.joined_at.to_rfc3339(),
    })
}

pub fn invitation_to_json(inv: &Invitation) -> JsonValue {
    json!({
        "id": inv.id.to_string(),
        "organization_id": inv.organization_id.to_string(),
        "sender_id": inv.sender_id.to_string(),
        "receiver_id": inv.receiver_id.to_string(),
        "status": inv.status.as_str(),
        "created_at": inv.created_at.to_rfc3339(),
    })
}

pub fn citizen_to_json(citizen: &Citizen) -> JsonValue {
    json!({
        "id": citizen.id.to_string(),
        "organization_id": citizen.organization_id.to_string(),
        "first_name": citizen.first_name.as_str(),
        "last_name": citizen.last_name.as_str(),
        "full_name": citizen.full_name(),
        "created_at": citizen.created_at.to_rfc3339(),
        "updated_at": citizen.updated_at.to_rfc3339(),
    })
}

pub fn grade_to_json(grade: &Grade) -> JsonValue {
    json!({
        "id": grade.id.to_string(),
        "organization_id": grade.organization_id.to_string(),
        "name": grade.name.as_str(),
        "citizen_ids": grade.citizens.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "created_at": grade.created_at.to_rfc3339(),
        "updated_at": grade.updated_at.to_rfc3339(),
    })
}

pub fn pictogram_to_json(pictogram: &Pictogram) -> JsonValue {
    json!({
        "id": pictogram.id.to_string(),
        "organization_id": pictogram.organization_id.map(|id| id.to_string()),
        "name": pictogram.name.as_str(),
        "image_url": pictogram.image_url,
        "created_at": pictogram.created_at.to_rfc3339(),
    })
}
