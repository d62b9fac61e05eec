//! Nurse model

use serde::{Deserialize, Serialize};

use super::{Collection, Entity, EntityId, OfflinePolicy};

/// A nurse account visible to the admin dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nurse {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub surnames: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub on_duty: Option<bool>,
    #[serde(default)]
    pub pending: bool,
}

/// Form payload for registering a nurse. The password travels to the server
/// only; the optimistic local document never retains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NurseDraft {
    pub name: String,
    pub surnames: String,
    pub username: String,
    pub password: String,
}

impl Entity for Nurse {
    type Draft = NurseDraft;

    const COLLECTION: Collection = Collection::Nurses;
    // Editing or removing an account changes credentials; online-only.
    const POLICY: OfflinePolicy = OfflinePolicy::CREATE_ONLY;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn sort_key(&self) -> String {
        format!("{} {}", self.name, self.surnames).to_lowercase()
    }

    fn from_draft(draft: &Self::Draft, id: EntityId) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            surnames: draft.surnames.clone(),
            username: Some(draft.username.clone()),
            on_duty: None,
            pending: true,
        }
    }
}
