use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::role::Role;
use crate::error::{AppError, AppResult};

/// The signed-in user as the backend describes it.
///
/// Only `id` is mandatory; everything else defaults so that sparse payloads (and
/// identities cached by older clients) still restore. Fields this crate does not model
/// (bio, avatar, stats, ...) are kept verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default, deserialize_with = "lenient_role", skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, rename = "emailUpdates", skip_serializing_if = "Option::is_none")]
    pub email_updates: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Roles arrive either as a plain string or as `{role_type, name}`; anything else is "no role".
fn lenient_role<'de, D>(d: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(Role::from_value))
}

impl User {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            is_staff: false,
            role: None,
            permissions: None,
            preferences: None,
            name: None,
            extra: Map::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self { self.role = Some(role); self }

    /// The role tag after normalizing both wire shapes; `None` when no usable role is set.
    pub fn resolved_role(&self) -> Option<&str> {
        self.role.as_ref().map(Role::role_type)
    }

    pub fn display_name(&self) -> String {
        if let Some(n) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return n.to_string();
        }
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() { self.username.clone() } else { full.to_string() }
    }

    /// Shallow merge: every top-level key of `patch` replaces the same key of this user.
    /// Nested objects (e.g. `preferences`) are replaced whole, not merged.
    pub fn merged(&self, patch: &Value) -> AppResult<User> {
        let Value::Object(patch) = patch else {
            return Err(AppError::user("invalid_patch", "user update must be a JSON object"));
        };
        let mut base = match serde_json::to_value(self)? {
            Value::Object(m) => m,
            _ => return Err(AppError::decode("invalid_user", "user did not serialize to an object")),
        };
        for (k, v) in patch {
            base.insert(k.clone(), v.clone());
        }
        serde_json::from_value(Value::Object(base))
            .map_err(|e| AppError::user("invalid_patch".to_string(), format!("update does not produce a valid user: {}", e)))
    }
}
