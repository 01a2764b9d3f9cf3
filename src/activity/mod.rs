//! Activity parsing: one raw feed activity into its canonical shape
//!
//! Only activities whose object is a Manifest are kept. Everything else
//! (Collections, Canvases, ...) parses to `ActivityRecord::Ignore`, but only
//! after the activity has passed the same shape checks, so a malformed
//! activity is never mistaken for an ignorable one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Resource types treated as Manifests.
const MANIFEST_TYPES: &[&str] = &["Manifest", "sc:Manifest"];

/// The kind of change an activity announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Move,
    Add,
    Remove,
    Refresh,
    /// The activity's subject is not a Manifest
    Ignore,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Move => "Move",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Refresh => "Refresh",
            Self::Ignore => "Ignore",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            "Move" => Ok(Self::Move),
            "Add" => Ok(Self::Add),
            "Remove" => Ok(Self::Remove),
            "Refresh" => Ok(Self::Refresh),
            "Ignore" => Ok(Self::Ignore),
            other => Err(ActivityError::UnknownKind(other.to_string())),
        }
    }
}

/// Why a raw activity could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActivityError {
    #[error("activity is not a JSON object")]
    NotAnObject,

    #[error("missing or non-string field `{0}`")]
    Missing(&'static str),

    #[error("`object` is missing or not a JSON object")]
    MissingObject,

    #[error("unsupported activity type `{0}`")]
    UnknownKind(String),

    #[error("endTime `{value}` is not an RFC 3339 timestamp")]
    InvalidEndTime { value: String },
}

/// A change to a Manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub subject_url: String,
    /// `None` when the feed gave no endTime
    pub end_time: Option<DateTime<Utc>>,
}

/// A parsed activity: either a Manifest change or something to skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityRecord {
    Ignore,
    Change(Activity),
}

impl ActivityRecord {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::Ignore => ActivityKind::Ignore,
            Self::Change(activity) => activity.kind,
        }
    }

    pub fn subject_url(&self) -> Option<&str> {
        match self {
            Self::Ignore => None,
            Self::Change(activity) => Some(&activity.subject_url),
        }
    }

    pub fn as_change(&self) -> Option<&Activity> {
        match self {
            Self::Ignore => None,
            Self::Change(activity) => Some(activity),
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore)
    }
}

fn string_field<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, ActivityError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ActivityError::Missing(field))
}

/// Parse one raw activity.
pub fn parse_activity(raw: &Value) -> Result<ActivityRecord, ActivityError> {
    if !raw.is_object() {
        return Err(ActivityError::NotAnObject);
    }

    let kind = string_field(raw, "type")?;
    let object = raw
        .get("object")
        .filter(|o| o.is_object())
        .ok_or(ActivityError::MissingObject)?;
    let object_type = string_field(object, "type").map_err(|_| ActivityError::Missing("object.type"))?;
    let object_id = string_field(object, "id").map_err(|_| ActivityError::Missing("object.id"))?;

    if !MANIFEST_TYPES.contains(&object_type) {
        return Ok(ActivityRecord::Ignore);
    }

    let kind: ActivityKind = kind.parse()?;
    if kind == ActivityKind::Ignore {
        return Err(ActivityError::UnknownKind(kind.to_string()));
    }

    let end_time = match raw.get("endTime") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            DateTime::parse_from_rfc3339(s)
                .map_err(|_| ActivityError::InvalidEndTime { value: s.clone() })?
                .with_timezone(&Utc),
        ),
        Some(other) => {
            return Err(ActivityError::InvalidEndTime {
                value: other.to_string(),
            })
        }
    };

    Ok(ActivityRecord::Change(Activity {
        kind,
        subject_url: object_id.to_string(),
        end_time,
    }))
}
