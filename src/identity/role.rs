use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user's role as carried on the wire.
///
/// Older backends send a bare string, newer ones an object with a `role_type` tag and a
/// human-readable name. Code that needs the tag goes through [`Role::role_type`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Role {
    Simple(String),
    Structured {
        role_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Role {
    pub fn simple(tag: impl Into<String>) -> Self { Role::Simple(tag.into()) }

    pub fn role_type(&self) -> &str {
        match self {
            Role::Simple(s) => s.as_str(),
            Role::Structured { role_type, .. } => role_type.as_str(),
        }
    }

    /// Normalize an arbitrary JSON value; shapes other than the two above yield `None`.
    pub fn from_value(v: &Value) -> Option<Role> {
        match v {
            Value::String(s) => Some(Role::Simple(s.clone())),
            Value::Object(m) => {
                let role_type = m.get("role_type")?.as_str()?.to_string();
                let name = m.get("name").and_then(|n| n.as_str()).map(|s| s.to_string());
                Some(Role::Structured { role_type, name })
            }
            _ => None,
        }
    }
}

/// The closed set of role tags the platform assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleTag {
    Student,
    Teacher,
    Admin,
    SuperAdmin,
}

impl RoleTag {
    pub const ALL: [RoleTag; 4] = [RoleTag::Student, RoleTag::Teacher, RoleTag::Admin, RoleTag::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTag::Student => "student",
            RoleTag::Teacher => "teacher",
            RoleTag::Admin => "admin",
            RoleTag::SuperAdmin => "super_admin",
        }
    }
}

impl Display for RoleTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for RoleTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        RoleTag::ALL
            .into_iter()
            .find(|r| r.as_str() == t)
            .ok_or_else(|| format!("unknown role '{}' (expected one of student, teacher, admin, super_admin)", s))
    }
}
