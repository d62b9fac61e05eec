//! Room model

use serde::{Deserialize, Serialize};

use super::{Collection, Entity, EntityId, OfflinePolicy};

/// A room grouping beds, assigned to an island (ward area).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: EntityId,
    pub name: String,
    /// Number of beds provisioned when the room was created.
    #[serde(default)]
    pub beds: Option<i64>,
    #[serde(default)]
    pub island_id: Option<i64>,
    #[serde(default)]
    pub pending: bool,
}

/// Form payload for creating a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDraft {
    pub name: String,
    pub beds: i64,
    pub island_id: i64,
}

impl Entity for Room {
    type Draft = RoomDraft;

    const COLLECTION: Collection = Collection::Rooms;
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
            beds: Some(draft.beds),
            island_id: Some(draft.island_id),
            pending: true,
        }
    }
}
