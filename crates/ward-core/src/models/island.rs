//! Island (ward area) model

use serde::{Deserialize, Serialize};

use super::{Collection, Entity, EntityId, OfflinePolicy};

/// A ward area ("island") grouping rooms for nurse assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Island {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

/// Form payload for creating an island.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Entity for Island {
    type Draft = IslandDraft;

    const COLLECTION: Collection = Collection::Islands;
    const POLICY: OfflinePolicy = OfflinePolicy::CREATE_ONLY;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn sort_key(&self) -> String {
        self.name.to_lowercase()
    }

    fn from_draft(draft: &Self::Draft, id: EntityId) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            description: Some(draft.description.clone()),
            pending: true,
        }
    }
}
