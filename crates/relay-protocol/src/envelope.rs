//! Envelope type for the relay protocol.
//!
//! An envelope is a JSON object with a string `type` field. The relay only
//! ever looks at `type`, `room`, and the optional `name`/`role` carried by a
//! join; everything else is opaque payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::codec::ProtocolError;

/// Discriminator field name.
pub const TYPE_FIELD: &str = "type";

/// Room-scoping field name.
pub const ROOM_FIELD: &str = "room";

/// Envelope type that assigns a connection to a room.
pub const JOIN: &str = "join";

/// Envelope type of the server's join acknowledgement.
pub const JOINED: &str = "joined";

/// Role recorded for joins that do not name one.
pub const DEFAULT_ROLE: &str = "player";

/// A room identifier.
pub type RoomId = String;

/// Display metadata a client may attach to its join.
///
/// The relay stores this alongside the connection but never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name (empty when not provided).
    pub name: String,
    /// Role in the session (`"player"` when not provided).
    pub role: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: String::new(),
            role: DEFAULT_ROLE.to_string(),
        }
    }
}

/// A protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with only a `type` field.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(kind.into()));
        Self { fields }
    }

    /// Create a join request for a room.
    #[must_use]
    pub fn join(room: impl Into<RoomId>) -> Self {
        Self::new(JOIN).with_field(ROOM_FIELD, Value::String(room.into()))
    }

    /// Create the server acknowledgement for a completed join.
    #[must_use]
    pub fn joined(room: impl Into<RoomId>) -> Self {
        Self::new(JOINED).with_field(ROOM_FIELD, Value::String(room.into()))
    }

    /// Add or replace a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Get the envelope type.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.fields
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Check if this is a join request.
    #[must_use]
    pub fn is_join(&self) -> bool {
        self.kind() == JOIN
    }

    /// Get the `room` field as a room identifier.
    ///
    /// Non-empty strings are used verbatim and non-zero numbers are
    /// converted to their shortest decimal text (`1.0` becomes `"1"`).
    /// Zero and any other value count as no room.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        match self.fields.get(ROOM_FIELD)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => number_room(n),
            _ => None,
        }
    }

    /// Overwrite the `room` field.
    pub fn restamp_room(&mut self, room: &str) {
        self.fields
            .insert(ROOM_FIELD.to_string(), Value::String(room.to_string()));
    }

    /// Extract the join profile (`name` and `role`).
    #[must_use]
    pub fn profile(&self) -> Profile {
        let text = |key: &str| {
            self.fields
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let defaults = Profile::default();
        Profile {
            name: text("name").unwrap_or(defaults.name),
            role: text("role").unwrap_or(defaults.role),
        }
    }

    /// Get a field by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Borrow all fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

fn number_room(n: &Number) -> Option<RoomId> {
    if let Some(i) = n.as_i64() {
        return (i != 0).then(|| i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    // f64 Display drops a zero fraction: 1.0 prints as "1".
    n.as_f64().filter(|f| *f != 0.0).map(|f| f.to_string())
}

impl TryFrom<Map<String, Value>> for Envelope {
    type Error = ProtocolError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get(TYPE_FIELD) {
            Some(Value::String(_)) => Ok(Self { fields }),
            _ => Err(ProtocolError::MissingType),
        }
    }
}

impl From<Envelope> for Map<String, Value> {
    fn from(envelope: Envelope) -> Self {
        envelope.fields
    }
}
