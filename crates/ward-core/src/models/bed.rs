//! Bed model

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Collection, Entity, EntityId, OfflinePolicy};

/// Embedded room reference as returned by the bed listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRef {
    pub id: i64,
    pub name: String,
}

/// A bed inside a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bed {
    pub id: EntityId,
    #[serde(default)]
    pub room_id: Option<i64>,
    pub bed_label: String,
    #[serde(default)]
    pub qrcode: Option<String>,
    /// Normalized at ingest: the server has historically emitted this flag
    /// as a boolean, a number, or a string.
    #[serde(default, deserialize_with = "deserialize_occupancy")]
    pub is_occupied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomRef>,
    /// True until the server confirms the operation that created this bed.
    #[serde(default)]
    pub pending: bool,
}

/// Form payload for creating a bed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedDraft {
    pub room_id: i64,
    pub bed_label: String,
}

impl Entity for Bed {
    type Draft = BedDraft;

    const COLLECTION: Collection = Collection::Beds;
    // Deleting a bed can orphan an active admission; never deferred.
    const POLICY: OfflinePolicy = OfflinePolicy::CREATE_ONLY;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn sort_key(&self) -> String {
        self.bed_label.to_lowercase()
    }

    fn from_draft(draft: &Self::Draft, id: EntityId) -> Self {
        Self {
            id,
            room_id: Some(draft.room_id),
            bed_label: draft.bed_label.clone(),
            qrcode: None,
            is_occupied: false,
            room: None,
            pending: true,
        }
    }
}

/// Accept the occupancy flag in any of the encodings observed from the
/// server: bool, number, or string ("true"/"1"/"occupied").
fn deserialize_occupancy<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_occupancy_flag(&value))
}

/// Single boundary parser for occupancy-like flags.
pub(crate) fn parse_occupancy_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => {
            let text = text.to_lowercase();
            matches!(text.as_str(), "true" | "1" | "occupied" | "ocupada")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn occupancy_flag_accepts_all_observed_encodings() {
        assert!(parse_occupancy_flag(&json!(true)));
        assert!(parse_occupancy_flag(&json!(1)));
        assert!(parse_occupancy_flag(&json!("true")));
        assert!(parse_occupancy_flag(&json!("1")));
        assert!(parse_occupancy_flag(&json!("occupied")));

        assert!(!parse_occupancy_flag(&json!(false)));
        assert!(!parse_occupancy_flag(&json!(0)));
        assert!(!parse_occupancy_flag(&json!("false")));
        assert!(!parse_occupancy_flag(&json!("available")));
        assert!(!parse_occupancy_flag(&json!(null)));
    }

    #[test]
    fn bed_deserializes_with_loose_occupancy_and_missing_fields() {
        let bed: Bed = serde_json::from_value(json!({
            "id": 77,
            "bedLabel": "B-12",
            "isOccupied": "ocupada",
            "room": { "id": 3, "name": "Ward A" }
        }))
        .unwrap();

        assert_eq!(bed.id, EntityId::Server(77));
        assert!(bed.is_occupied);
        assert!(!bed.pending);
        assert_eq!(bed.room.as_ref().map(|r| r.id), Some(3));
    }

    #[test]
    fn draft_builds_pending_local_document() {
        let draft = BedDraft {
            room_id: 3,
            bed_label: "B-12".to_string(),
        };
        let bed = Bed::from_draft(&draft, EntityId::new_temp());

        assert!(bed.pending);
        assert!(bed.id.is_temp());
        assert!(!bed.is_occupied);
        assert_eq!(bed.room_id, Some(3));
    }
}
