use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{NoteError, NoteResult};
use crate::paths;

fn root_folder() -> String {
    paths::ROOT.to_string()
}

/// Servers send `null` or omit the folder for notes in the root.
fn deserialize_folder<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    paths::assign_folder(raw.as_deref()).map_err(serde::de::Error::custom)
}

fn trimmed_tags<I, T>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Tag filters travel comma-joined, so a tag can never contain a comma.
pub const TAG_SEPARATOR: char = ',';

fn check_tags<'a, I>(tags: I) -> NoteResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    match tags.into_iter().find(|tag| tag.contains(TAG_SEPARATOR)) {
        Some(tag) => Err(NoteError::validation(format!(
            "Tag '{}' cannot contain '{}'",
            tag.trim(),
            TAG_SEPARATOR
        ))),
        None => Ok(()),
    }
}

fn require_text(value: &str, message: &str) -> NoteResult<()> {
    if value.trim().is_empty() {
        return Err(NoteError::validation(message));
    }
    Ok(())
}

/// A note as held by the remote store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    /// Rich document produced by the editor; never interpreted here.
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub category: String,
    #[serde(
        rename = "folder",
        default = "root_folder",
        deserialize_with = "deserialize_folder"
    )]
    pub folder_path: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn has_all_tags<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().all(|tag| self.tags.contains(tag))
    }
}

/// Information about a folder in the remote hierarchy
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub path: String,
}

impl Folder {
    /// Builds a folder from its canonical path; the name is the last segment.
    pub fn at(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: paths::name_of(&path).to_string(),
            path,
        }
    }

    pub fn parent_path(&self) -> &str {
        paths::parent_of(&self.path).unwrap_or(paths::ROOT)
    }
}

/// Fields for a note that does not exist yet. The server assigns id and
/// timestamps.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub category: String,
    #[serde(rename = "folder")]
    pub folder_path: String,
    pub images: Vec<String>,
}

impl NoteDraft {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: category.into(),
            folder_path: root_folder(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.tags = trimmed_tags(tags);
        self
    }

    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder_path = folder.into();
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Checks required fields and returns the draft in the form sent to the
    /// store: trimmed title and category, cleaned tags, canonical folder.
    pub fn validated(self) -> NoteResult<Self> {
        require_text(&self.title, "Title is required")?;
        require_text(&self.category, "Category is required")?;
        require_text(&self.content, "Content is required")?;
        check_tags(&self.tags)?;

        Ok(Self {
            title: self.title.trim().to_string(),
            category: self.category.trim().to_string(),
            tags: trimmed_tags(&self.tags),
            folder_path: paths::assign_folder(Some(self.folder_path.as_str()))?,
            content: self.content,
            images: self.images,
        })
    }
}

/// Partial update of an existing note. Absent fields are left untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "folder", skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

impl NoteUpdate {
    pub fn favorite(value: bool) -> Self {
        Self {
            is_favorite: Some(value),
            ..Default::default()
        }
    }

    pub fn archived(value: bool) -> Self {
        Self {
            is_archived: Some(value),
            ..Default::default()
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            folder_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Same rules as [`NoteDraft::validated`], applied to the fields present.
    pub fn validated(self) -> NoteResult<Self> {
        if let Some(title) = &self.title {
            require_text(title, "Title is required")?;
        }
        if let Some(category) = &self.category {
            require_text(category, "Category is required")?;
        }
        if let Some(content) = &self.content {
            require_text(content, "Content is required")?;
        }
        if let Some(tags) = &self.tags {
            check_tags(tags)?;
        }
        let folder_path = match &self.folder_path {
            Some(path) => Some(paths::assign_folder(Some(path.as_str()))?),
            None => None,
        };

        Ok(Self {
            title: self.title.map(|t| t.trim().to_string()),
            category: self.category.map(|c| c.trim().to_string()),
            tags: self.tags.map(trimmed_tags),
            folder_path,
            ..self
        })
    }

    /// Applies the present fields to `note`.
    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(content) = &self.content {
            note.content = content.clone();
        }
        if let Some(tags) = &self.tags {
            note.tags = tags.clone();
        }
        if let Some(category) = &self.category {
            note.category = category.clone();
        }
        if let Some(folder) = &self.folder_path {
            note.folder_path = folder.clone();
        }
        if let Some(images) = &self.images {
            note.images = images.clone();
        }
        if let Some(favorite) = self.is_favorite {
            note.is_favorite = favorite;
        }
        if let Some(archived) = self.is_archived {
            note.is_archived = archived;
        }
    }
}

/// Application configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub api_base_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            poll_interval_secs: 30,
            request_timeout_secs: 15,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
