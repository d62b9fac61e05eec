//! Help alert model (patient call button / nurse console)

use serde::{Deserialize, Serialize};

use super::{Collection, Entity, EntityId, OfflinePolicy};

/// Fixed outbox target for the patient help button: at most one help alert
/// is ever pending locally, a newer offline trigger replaces the older one.
pub const HELP_ALERT_SINGLETON: &str = "temp_current_pending_alert";

/// A help alert raised from a patient bed, as listed by the nurse console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpAlert {
    pub id: EntityId,
    #[serde(default)]
    pub admission_id: Option<i64>,
    #[serde(default)]
    pub bed_label: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

/// Trigger payload for a help alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpAlertDraft {
    pub admission_id: i64,
    /// Client-side trigger time, preserved across an offline replay.
    pub created_at: String,
}

impl Entity for HelpAlert {
    type Draft = HelpAlertDraft;

    const COLLECTION: Collection = Collection::HelpAlerts;
    const POLICY: OfflinePolicy = OfflinePolicy::CREATE_ONLY;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn sort_key(&self) -> String {
        self.created_at.clone().unwrap_or_default()
    }

    fn from_draft(draft: &Self::Draft, id: EntityId) -> Self {
        Self {
            id,
            admission_id: Some(draft.admission_id),
            bed_label: None,
            room_name: None,
            status: None,
            created_at: Some(draft.created_at.clone()),
            pending: true,
        }
    }
}
