// Copyright (c) 2025 pynickle. This is a fork of Original Crate. Original copyright: Copyright (c) 2025 NameOfShadow

use std::collections::HashMap;
use std::fmt;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::MojangError;

/// Resolved unique id for a display name.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityLookup {
    unique_id: Uuid,
}

/// Texture metadata of a profile, taken from its first `properties` entry.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SkinInfo {
    id: String,
    name: String,
    value: String,
    signature: String,
}

/// Past display names of one account.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NameHistory {
    owner: Uuid,
    names: HashMap<String, i64>,
}

/// Hashed server addresses flagged by the session server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct BlockedServers {
    hashes: Vec<String>,
}

impl IdentityLookup {
    /// Reads the `id` field of a profile lookup response.
    ///
    /// The service answers with the undashed form; both forms are accepted.
    pub fn from_json(json: &Value) -> Result<Self, MojangError> {
        let object = as_object(json)?;
        let id = str_field(object, "id")?;
        Ok(Self {
            unique_id: Uuid::parse_str(id)?,
        })
    }

    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }
}

impl fmt::Display for IdentityLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unique_id.hyphenated())
    }
}

impl From<IdentityLookup> for Uuid {
    fn from(lookup: IdentityLookup) -> Self {
        lookup.unique_id
    }
}

impl SkinInfo {
    pub fn from_json(json: &Value) -> Result<Self, MojangError> {
        let object = as_object(json)?;
        let properties = object
            .get("properties")
            .ok_or(MojangError::MissingField { field: "properties" })?
            .as_array()
            .ok_or_else(|| MojangError::UnexpectedShape("`properties` is not an array".to_string()))?;
        let textures = properties.first().ok_or(MojangError::EmptyProperties)?;
        let textures = as_object(textures)?;

        Ok(Self {
            id: str_field(object, "id")?.to_string(),
            name: str_field(object, "name")?.to_string(),
            value: str_field(textures, "value")?.to_string(),
            signature: str_field(textures, "signature")?.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base64 texture blob, as sent by the session server.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Decodes the texture blob into the JSON document it wraps
    /// (`timestamp`, `profileId`, `textures.SKIN.url`, ...).
    pub fn textures(&self) -> Result<Value, MojangError> {
        let bytes = general_purpose::STANDARD.decode(&self.value)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl fmt::Debug for SkinInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkinInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("value", &self.value.len())
            .field("signature", &self.signature.len())
            .finish()
    }
}

impl NameHistory {
    /// Timestamp stored for the account's first name, which has no `changedToAt`.
    pub const ORIGINAL: i64 = -1;

    /// Folds a name history array. Repeated names keep their last timestamp.
    pub fn from_json(owner: Uuid, json: &Value) -> Result<Self, MojangError> {
        let entries = json
            .as_array()
            .ok_or_else(|| MojangError::UnexpectedShape("expected a JSON array".to_string()))?;

        let mut names = HashMap::with_capacity(entries.len());
        for entry in entries {
            let entry = as_object(entry)?;
            let name = str_field(entry, "name")?;
            let changed_at = match entry.get("changedToAt") {
                None | Some(Value::Null) => Self::ORIGINAL,
                Some(v) => v.as_i64().ok_or_else(|| {
                    MojangError::UnexpectedShape(format!("`changedToAt` is not an integer: {v}"))
                })?,
            };
            names.insert(name.to_string(), changed_at);
        }

        Ok(Self { owner, names })
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Every known name with its change timestamp, or [`Self::ORIGINAL`].
    pub fn names(&self) -> &HashMap<String, i64> {
        &self.names
    }

    /// `Some(millis)` for a rename, `None` for the original name or an unknown one.
    pub fn changed_at(&self, name: &str) -> Option<i64> {
        self.names.get(name).copied().filter(|&ts| ts != Self::ORIGINAL)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl BlockedServers {
    /// One entry per non-empty line, in response order.
    pub fn from_text(body: &str) -> Self {
        Self {
            hashes: body
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn hashes(&self) -> &[String] {
        &self.hashes
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.iter().any(|h| h == hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl IntoIterator for BlockedServers {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.hashes.into_iter()
    }
}

fn as_object(json: &Value) -> Result<&Map<String, Value>, MojangError> {
    json.as_object()
        .ok_or_else(|| MojangError::UnexpectedShape(format!("expected a JSON object, got {json}")))
}

fn str_field<'a>(object: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, MojangError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or(MojangError::MissingField { field })
}
