use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::MAX_TITLE_LENGTH;
use crate::error::{TaskError, TaskResult};

/// One to-do item as stored in the `tasks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned by the store. Postgres may hand out uuids or bigints, both
    /// are kept as opaque strings.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    /// Owner identity. Only used for filtering change notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Task {
    /// Apply the fields present in `patch`, leaving the rest untouched.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(is_complete) = patch.is_complete {
            self.is_complete = is_complete;
        }
    }

    /// Copy the mutable fields of a newer version of this task.
    /// Identifier, creation time and owner never change.
    pub fn absorb(&mut self, newer: &Task) {
        self.title = newer.title.clone();
        self.description = newer.description.clone();
        self.is_complete = newer.is_complete;
    }
}

/// Accepts `"abc"` and `42` alike.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Trim a title and check it is non-empty and within bounds.
pub fn validate_title(title: &str) -> TaskResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(TaskError::validation("Title is required"));
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(TaskError::validation(format!(
            "Title exceeds {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Body of an insert request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewTask {
    /// Validated constructor: trims both fields and drops a blank description.
    pub fn new(title: &str, description: Option<&str>) -> TaskResult<Self> {
        let title = validate_title(title)?;
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok(Self { title, description })
    }

    pub fn validate(self) -> TaskResult<Self> {
        Self::new(&self.title, self.description.as_deref())
    }
}

/// Partial update. Absent fields are left out of the payload entirely:
/// omitted means "unchanged", never "cleared".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
}

impl TaskPatch {
    pub fn completion(is_complete: bool) -> Self {
        Self {
            is_complete: Some(is_complete),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.is_complete.is_none()
    }

    /// Titles follow the same rules as on creation when they are present.
    pub fn validate(mut self) -> TaskResult<Self> {
        if let Some(title) = self.title.take() {
            self.title = Some(validate_title(&title)?);
        }
        Ok(self)
    }
}

/// Aggregates shown next to the list (filter badges, headers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub complete: usize,
    pub incomplete: usize,
}

impl TaskCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.total += 1;
            if task.is_complete {
                counts.complete += 1;
            } else {
                counts.incomplete += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn make_task(id: &str, title: &str, created_at: i64) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            is_complete: false,
            created_at: Utc.timestamp_opt(created_at, 0).unwrap(),
            user_id: Some("user-1".to_string()),
        }
    }
}
