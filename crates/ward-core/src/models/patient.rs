//! Patient model

use serde::{Deserialize, Serialize};

use super::{Collection, Entity, EntityId, OfflinePolicy};

/// A patient record. Admission state lives server-side; this document only
/// carries the demographic fields the admin dashboard edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub surnames: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

/// Form payload for registering or editing a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDraft {
    pub name: String,
    pub surnames: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Entity for Patient {
    type Draft = PatientDraft;

    const COLLECTION: Collection = Collection::Patients;
    const POLICY: OfflinePolicy = OfflinePolicy::QUEUE_ALL;

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
            notes: draft.notes.clone(),
            pending: true,
        }
    }
}
