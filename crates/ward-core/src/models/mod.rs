//! Entity model shared by the cache, outbox, and repositories.
//!
//! The sync core treats entity payloads as opaque JSON documents; the typed
//! structs in this module exist so that server data is validated and
//! normalized exactly once, when it crosses into the Local Store.

mod bed;
mod help;
mod island;
mod nurse;
mod patient;
mod room;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::{random_suffix, unix_timestamp_millis};

pub use bed::{Bed, BedDraft, RoomRef};
pub use help::{HelpAlert, HelpAlertDraft, HELP_ALERT_SINGLETON};
pub use island::{Island, IslandDraft};
pub use nurse::{Nurse, NurseDraft};
pub use patient::{Patient, PatientDraft};
pub use room::{Room, RoomDraft};

/// Prefix shared by every client-generated temporary identifier.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// A logical entity collection. One Local Store snapshot and one outbox
/// stream exist per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    Beds,
    Rooms,
    Islands,
    Nurses,
    Patients,
    HelpAlerts,
}

impl Collection {
    /// Every known collection, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Beds,
        Self::Rooms,
        Self::Islands,
        Self::Nurses,
        Self::Patients,
        Self::HelpAlerts,
    ];

    /// Stable storage key for this collection.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beds => "beds",
            Self::Rooms => "rooms",
            Self::Islands => "islands",
            Self::Nurses => "nurses",
            Self::Patients => "patients",
            Self::HelpAlerts => "help-alerts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "beds" => Ok(Self::Beds),
            "rooms" => Ok(Self::Rooms),
            "islands" => Ok(Self::Islands),
            "nurses" => Ok(Self::Nurses),
            "patients" => Ok(Self::Patients),
            "help-alerts" => Ok(Self::HelpAlerts),
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }
}

/// Identifier of an entity document.
///
/// Server-assigned ids are numeric; before the server confirms a queued
/// CREATE the document carries a client-generated `temp_<millis>_<suffix>`
/// placeholder. The two are never both present for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    /// Identifier assigned by the server.
    Server(i64),
    /// Client-generated placeholder awaiting CREATE confirmation.
    Temp(String),
}

impl EntityId {
    /// Generate a fresh temporary identifier.
    pub fn new_temp() -> Self {
        Self::Temp(format!(
            "{TEMP_ID_PREFIX}{}_{}",
            unix_timestamp_millis(),
            random_suffix()
        ))
    }

    /// Whether this id is an unconfirmed client placeholder.
    pub const fn is_temp(&self) -> bool {
        matches!(self, Self::Temp(_))
    }

    /// Storage/URL representation of the id.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Temp(id) => f.write_str(id),
        }
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with(TEMP_ID_PREFIX) {
            return Ok(Self::Temp(s.to_string()));
        }
        s.parse::<i64>()
            .map(Self::Server)
            .map_err(|_| Error::InvalidInput(format!("invalid entity id: {s}")))
    }
}

impl Serialize for EntityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Server(id) => serializer.serialize_i64(*id),
            Self::Temp(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = EntityId;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a numeric server id or a temp_* string")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<EntityId, E> {
                Ok(EntityId::Server(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<EntityId, E> {
                i64::try_from(v)
                    .map(EntityId::Server)
                    .map_err(|_| E::custom("entity id out of range"))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<EntityId, E> {
                v.parse()
                    .map_err(|_| E::custom(format!("invalid entity id: {v}")))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Which mutations an entity type allows the offline path to queue.
///
/// Operations excluded here fail fast with a requires-connectivity error
/// instead of enqueueing (irreversible or permission-sensitive operations,
/// e.g. deleting a bed that may hold an active patient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflinePolicy {
    pub queue_create: bool,
    pub queue_update: bool,
    pub queue_delete: bool,
}

impl OfflinePolicy {
    /// Every mutation may be deferred offline.
    pub const QUEUE_ALL: Self = Self {
        queue_create: true,
        queue_update: true,
        queue_delete: true,
    };

    /// Only creations may be deferred; update/delete are online-only.
    pub const CREATE_ONLY: Self = Self {
        queue_create: true,
        queue_update: false,
        queue_delete: false,
    };
}

/// A typed entity document stored in one Local Store collection.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Form payload submitted on create/update.
    type Draft: Serialize + Clone + Send + Sync + 'static;

    /// The collection this entity type lives in.
    const COLLECTION: Collection;

    /// Offline queueing policy for this entity type.
    const POLICY: OfflinePolicy;

    /// Identifier of this document.
    fn id(&self) -> &EntityId;

    /// Sort key used when projecting a collection snapshot for display.
    fn sort_key(&self) -> String;

    /// Build the optimistic local document for a not-yet-confirmed draft.
    fn from_draft(draft: &Self::Draft, id: EntityId) -> Self;
}

/// Validate and normalize a raw server document for `collection`.
///
/// This is the single boundary where loosely-typed server JSON (string or
/// numeric booleans, missing optional fields) becomes the crate's one
/// well-defined representation. Everything entering the Local Store passes
/// through here.
pub fn normalize_document(collection: Collection, value: &Value) -> Result<Value> {
    match collection {
        Collection::Beds => round_trip::<Bed>(value),
        Collection::Rooms => round_trip::<Room>(value),
        Collection::Islands => round_trip::<Island>(value),
        Collection::Nurses => round_trip::<Nurse>(value),
        Collection::Patients => round_trip::<Patient>(value),
        Collection::HelpAlerts => round_trip::<HelpAlert>(value),
    }
}

fn round_trip<E: Entity>(value: &Value) -> Result<Value> {
    let entity: E = serde_json::from_value(value.clone())?;
    Ok(serde_json::to_value(entity)?)
}

/// Extract the `id` field of a normalized document, if present.
pub fn document_id(value: &Value) -> Option<EntityId> {
    serde_json::from_value(value.get("id")?.clone()).ok()
}
