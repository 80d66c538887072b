use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Note, TAG_SEPARATOR};
use crate::paths;

/// Which slice of the note store a view shows. Exactly one is active.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ViewKind {
    #[default]
    All,
    Favorites,
    Archived,
    ByCategory,
    ByFolder,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    UpdatedAt,
    CreatedAt,
    Title,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::UpdatedAt => "updatedAt",
            SortField::CreatedAt => "createdAt",
            SortField::Title => "title",
        }
    }

    /// Titles read naturally A to Z; timestamps newest first.
    pub fn default_order(&self) -> SortOrder {
        match self {
            SortField::Title => SortOrder::Asc,
            SortField::UpdatedAt | SortField::CreatedAt => SortOrder::Desc,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Raw selections coming from filter, sort, search and navigation controls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryInputs {
    pub view_kind: Option<ViewKind>,
    pub sort_field: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    pub tags: Vec<String>,
    pub search_text: Option<String>,
    pub category: Option<String>,
    pub folder_path: Option<String>,
}

impl QueryInputs {
    pub fn view(mut self, kind: ViewKind) -> Self {
        self.view_kind = Some(kind);
        self
    }

    pub fn sort(mut self, field: SortField) -> Self {
        self.sort_field = Some(field);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.sort_order = Some(order);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn folder(mut self, path: impl Into<String>) -> Self {
        self.folder_path = Some(path.into());
        self
    }
}

/// Canonical, comparable form of a note query.
///
/// Built only through [`compose`] or the `with_*` helpers, which keep the
/// view-kind exclusivity: `category` is set only for `ByCategory` and
/// `folder_path` only for `ByFolder`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    view_kind: ViewKind,
    sort_field: SortField,
    sort_order: SortOrder,
    tag_filter: BTreeSet<String>,
    search_text: String,
    category: Option<String>,
    folder_path: Option<String>,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        compose(&QueryInputs::default())
    }
}

fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Trimmed filter tag. Empty tags and tags containing the separator are
/// dropped; no stored note can carry either.
fn filter_tag(tag: &str) -> Option<&str> {
    let tag = tag.trim();
    (!tag.is_empty() && !tag.contains(TAG_SEPARATOR)).then_some(tag)
}

/// Builds the canonical descriptor for a set of inputs.
///
/// Total over its inputs: a by-category selection without a category, or a
/// by-folder selection without a usable folder path, falls back to `All`.
/// When no view kind is given it is inferred from the selections, category
/// first, then folder.
pub fn compose(inputs: &QueryInputs) -> QueryDescriptor {
    let sort_field = inputs.sort_field.unwrap_or_default();
    let sort_order = inputs
        .sort_order
        .unwrap_or_else(|| sort_field.default_order());

    let category = clean_text(inputs.category.as_deref());
    let folder_path = match clean_text(inputs.folder_path.as_deref()) {
        Some(raw) => match paths::normalize(&raw) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Ignoring folder selection '{}': {}", raw, e);
                None
            }
        },
        None => None,
    };

    let requested = inputs.view_kind.unwrap_or(if category.is_some() {
        ViewKind::ByCategory
    } else if folder_path.is_some() {
        ViewKind::ByFolder
    } else {
        ViewKind::All
    });

    let (view_kind, category, folder_path) = match requested {
        ViewKind::ByCategory if category.is_some() => (requested, category, None),
        ViewKind::ByFolder if folder_path.is_some() => (requested, None, folder_path),
        ViewKind::ByCategory | ViewKind::ByFolder => (ViewKind::All, None, None),
        other => (other, None, None),
    };

    QueryDescriptor {
        view_kind,
        sort_field,
        sort_order,
        tag_filter: inputs
            .tags
            .iter()
            .filter_map(|t| filter_tag(t))
            .map(str::to_string)
            .collect(),
        search_text: clean_text(inputs.search_text.as_deref()).unwrap_or_default(),
        category,
        folder_path,
    }
}

impl QueryDescriptor {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn favorites() -> Self {
        compose(&QueryInputs::default().view(ViewKind::Favorites))
    }

    pub fn archived() -> Self {
        compose(&QueryInputs::default().view(ViewKind::Archived))
    }

    pub fn by_category(category: impl Into<String>) -> Self {
        compose(&QueryInputs::default().view(ViewKind::ByCategory).category(category))
    }

    pub fn by_folder(path: impl Into<String>) -> Self {
        compose(&QueryInputs::default().view(ViewKind::ByFolder).folder(path))
    }

    /// Inputs that reproduce this descriptor through [`compose`].
    pub fn to_inputs(&self) -> QueryInputs {
        QueryInputs {
            view_kind: Some(self.view_kind),
            sort_field: Some(self.sort_field),
            sort_order: Some(self.sort_order),
            tags: self.tag_filter.iter().cloned().collect(),
            search_text: Some(self.search_text.clone()),
            category: self.category.clone(),
            folder_path: self.folder_path.clone(),
        }
    }

    /// Switches view kind, keeping sort, tags and search. Selections that do
    /// not apply to the new kind are cleared.
    pub fn with_view_kind(
        &self,
        kind: ViewKind,
        category: Option<String>,
        folder_path: Option<String>,
    ) -> Self {
        let mut inputs = self.to_inputs().view(kind);
        inputs.category = category;
        inputs.folder_path = folder_path;
        compose(&inputs)
    }

    /// Changes the sort field. Without an explicit order the field's default
    /// order applies.
    pub fn with_sort(&self, field: SortField, order: Option<SortOrder>) -> Self {
        let mut inputs = self.to_inputs().sort(field);
        inputs.sort_order = order;
        compose(&inputs)
    }

    /// Adds the tag if absent, removes it if present.
    pub fn with_tag_toggled(&self, tag: &str) -> Self {
        let mut next = self.clone();
        if let Some(tag) = filter_tag(tag) {
            if !next.tag_filter.remove(tag) {
                next.tag_filter.insert(tag.to_string());
            }
        }
        next
    }

    pub fn with_search(&self, text: &str) -> Self {
        compose(&self.to_inputs().search(text))
    }

    /// Same query pointed at another folder. Used when a folder is renamed.
    pub fn with_folder_path(&self, path: &str) -> Self {
        let mut inputs = self.to_inputs();
        inputs.folder_path = Some(path.to_string());
        compose(&inputs)
    }

    pub fn view_kind(&self) -> ViewKind {
        self.view_kind
    }

    pub fn sort_field(&self) -> SortField {
        self.sort_field
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn tag_filter(&self) -> &BTreeSet<String> {
        &self.tag_filter
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn folder_path(&self) -> Option<&str> {
        self.folder_path.as_deref()
    }

    /// Query-string form sent to the remote store. The view kind and its
    /// category or folder are carried by the route, not by these parameters.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("sort", self.sort_field.as_str().to_string()),
            ("order", self.sort_order.as_str().to_string()),
        ];
        if !self.tag_filter.is_empty() {
            let separator = TAG_SEPARATOR.to_string();
            let tags: Vec<&str> = self.tag_filter.iter().map(String::as_str).collect();
            params.push(("tags", tags.join(separator.as_str())));
        }
        if !self.search_text.is_empty() {
            params.push(("search", self.search_text.clone()));
        }
        if let Some(category) = &self.category {
            params.push(("category", category.clone()));
        }
        params
    }

    /// Whether `note` belongs to this descriptor's view kind, ignoring tag
    /// and search filters. Archived notes only appear in the archive.
    pub fn scope_admits(&self, note: &Note) -> bool {
        match self.view_kind {
            ViewKind::Archived => note.is_archived,
            _ if note.is_archived => false,
            ViewKind::All => true,
            ViewKind::Favorites => note.is_favorite,
            ViewKind::ByCategory => self.category.as_deref() == Some(note.category.as_str()),
            ViewKind::ByFolder => self.folder_path.as_deref() == Some(note.folder_path.as_str()),
        }
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.view_kind)?;
        if let Some(category) = &self.category {
            write!(f, "({})", category)?;
        }
        if let Some(folder) = &self.folder_path {
            write!(f, "({})", folder)?;
        }
        write!(f, " {} {}", self.sort_field.as_str(), self.sort_order.as_str())?;
        if !self.tag_filter.is_empty() {
            write!(f, " tags={:?}", self.tag_filter)?;
        }
        if !self.search_text.is_empty() {
            write!(f, " search={:?}", self.search_text)?;
        }
        Ok(())
    }
}
