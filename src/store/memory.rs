//! In-process note store with the server semantics the sync layer relies
//! on. Backs the test suite and offline use; exposes hooks to delay, fail
//! and count remote calls.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{NoteError, NoteResult};
use crate::models::{Folder, Note, NoteDraft, NoteUpdate};
use crate::paths;
use crate::query::{QueryDescriptor, SortField, SortOrder};
use crate::session::Session;
use crate::store::NoteStore;

/// Operation names used by the test hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListNotes,
    GetNote,
    CreateNote,
    UpdateNote,
    DeleteNote,
    ListFolderContents,
    CreateFolder,
    RenameFolder,
    DeleteFolder,
    ListTags,
    ListCategories,
}

type ListLatency = Arc<dyn Fn(&QueryDescriptor) -> Duration + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    notes: BTreeMap<String, Note>,
    folders: BTreeSet<String>,
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, VecDeque<NoteError>>,
    latency: HashMap<StoreOp, Duration>,
    required_token: Option<String>,
}

#[derive(Default)]
pub struct MemoryNoteStore {
    state: Mutex<MemoryState>,
    list_latency: Mutex<Option<ListLatency>>,
}

/// Server-side validation surfaces as a remote failure, not a local one.
fn rejected(err: NoteError) -> NoteError {
    match err {
        NoteError::Validation(message) => NoteError::Remote(message),
        other => other,
    }
}

fn sort_notes(notes: &mut [Note], field: SortField, order: SortOrder) {
    notes.sort_by(|a, b| {
        let ordering = match field {
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        };
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
}

/// Full server-side filter: view scope, every selected tag, search text.
pub fn matches_query(note: &Note, query: &QueryDescriptor) -> bool {
    if !query.scope_admits(note) || !note.has_all_tags(query.tag_filter()) {
        return false;
    }
    let needle = query.search_text().to_lowercase();
    needle.is_empty()
        || note.title.to_lowercase().contains(&needle)
        || note.content.to_lowercase().contains(&needle)
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a note as if it had been created earlier.
    pub fn insert_note(&self, note: Note) {
        self.lock().notes.insert(note.id.clone(), note);
    }

    /// Adds a folder and any missing ancestors.
    pub fn insert_folder(&self, path: &str) -> NoteResult<()> {
        let path = paths::normalize(path)?;
        let mut state = self.lock();
        for crumb in paths::breadcrumbs(&path).skip(1) {
            state.folders.insert(crumb.path);
        }
        Ok(())
    }

    pub fn note(&self, id: &str) -> Option<Note> {
        self.lock().notes.get(id).cloned()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.lock().notes.values().cloned().collect()
    }

    pub fn folders(&self) -> Vec<String> {
        self.lock().folders.iter().cloned().collect()
    }

    /// Number of times `op` was called, including failed calls.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Makes the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: StoreOp, err: NoteError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Delays every call of `op` by `delay` before it is answered.
    pub fn set_latency(&self, op: StoreOp, delay: Duration) {
        self.lock().latency.insert(op, delay);
    }

    /// Delays note listings per query; overrides `set_latency` for listings.
    pub fn set_list_latency<F>(&self, latency: F)
    where
        F: Fn(&QueryDescriptor) -> Duration + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.list_latency.lock() {
            *slot = Some(Arc::new(latency));
        }
    }

    /// Rejects every call whose session does not carry this token.
    pub fn require_token(&self, token: Option<String>) {
        self.lock().required_token = token;
    }

    /// Bookkeeping shared by every operation: count, wait, authenticate,
    /// then consume an injected failure if one is queued.
    async fn enter(&self, op: StoreOp, session: &Session, delay: Option<Duration>) -> NoteResult<()> {
        let configured = {
            let mut state = self.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            state.latency.get(&op).copied()
        };

        if let Some(delay) = delay.or(configured).filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(required) = &state.required_token {
            if session.bearer_token().as_ref() != Some(required) {
                session.report_rejected();
                return Err(NoteError::Auth("Session expired - please login again".to_string()));
            }
        }
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn require_folder(state: &MemoryState, path: &str) -> NoteResult<()> {
        if paths::is_root(path) || state.folders.contains(path) {
            Ok(())
        } else {
            Err(NoteError::not_found(format!("Folder {} not found", path)))
        }
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn list_notes(&self, session: &Session, query: &QueryDescriptor) -> NoteResult<Vec<Note>> {
        let delay = self
            .list_latency
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|latency| latency(query)));
        self.enter(StoreOp::ListNotes, session, delay).await?;

        let state = self.lock();
        let mut notes: Vec<Note> = state
            .notes
            .values()
            .filter(|note| matches_query(note, query))
            .cloned()
            .collect();
        sort_notes(&mut notes, query.sort_field(), query.sort_order());
        Ok(notes)
    }

    async fn get_note(&self, session: &Session, id: &str) -> NoteResult<Note> {
        self.enter(StoreOp::GetNote, session, None).await?;
        self.note(id)
            .ok_or_else(|| NoteError::not_found(format!("Note {} not found", id)))
    }

    async fn create_note(&self, session: &Session, draft: &NoteDraft) -> NoteResult<Note> {
        self.enter(StoreOp::CreateNote, session, None).await?;
        let draft = draft.clone().validated().map_err(rejected)?;

        let mut state = self.lock();
        Self::require_folder(&state, &draft.folder_path)?;
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            content: draft.content,
            tags: draft.tags,
            category: draft.category,
            folder_path: draft.folder_path,
            images: draft.images,
            is_favorite: false,
            is_archived: false,
            created_at: now,
            updated_at: now,
        };
        state.notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    async fn update_note(&self, session: &Session, id: &str, update: &NoteUpdate) -> NoteResult<Note> {
        self.enter(StoreOp::UpdateNote, session, None).await?;
        let update = update.clone().validated().map_err(rejected)?;

        let mut state = self.lock();
        if let Some(folder) = &update.folder_path {
            Self::require_folder(&state, folder)?;
        }
        let note = state
            .notes
            .get_mut(id)
            .ok_or_else(|| NoteError::not_found(format!("Note {} not found", id)))?;
        update.apply_to(note);
        note.updated_at = Utc::now().max(note.updated_at);
        Ok(note.clone())
    }

    async fn delete_note(&self, session: &Session, id: &str) -> NoteResult<()> {
        self.enter(StoreOp::DeleteNote, session, None).await?;
        self.lock()
            .notes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| NoteError::not_found(format!("Note {} not found", id)))
    }

    async fn list_folder_contents(&self, session: &Session, path: &str) -> NoteResult<Vec<Folder>> {
        self.enter(StoreOp::ListFolderContents, session, None).await?;
        let path = paths::normalize(path).map_err(rejected)?;

        let state = self.lock();
        Self::require_folder(&state, &path)?;
        Ok(state
            .folders
            .iter()
            .filter(|folder| paths::parent_of(folder) == Some(path.as_str()))
            .map(|folder| Folder::at(folder.clone()))
            .collect())
    }

    async fn create_folder(&self, session: &Session, parent_path: &str, name: &str) -> NoteResult<Folder> {
        self.enter(StoreOp::CreateFolder, session, None).await?;
        let parent = paths::normalize(parent_path).map_err(rejected)?;
        let name = paths::validate_segment(name).map_err(rejected)?;

        let mut state = self.lock();
        Self::require_folder(&state, &parent)?;
        let path = paths::join(&parent, &name);
        if state.folders.contains(&path) {
            return Err(NoteError::conflict(format!("Folder {} already exists", path)));
        }
        state.folders.insert(path.clone());
        Ok(Folder::at(path))
    }

    async fn rename_folder(&self, session: &Session, path: &str, new_name: &str) -> NoteResult<Folder> {
        self.enter(StoreOp::RenameFolder, session, None).await?;
        let path = paths::normalize(path).map_err(rejected)?;
        let name = paths::validate_segment(new_name).map_err(rejected)?;

        let mut state = self.lock();
        if paths::is_root(&path) || !state.folders.contains(&path) {
            return Err(NoteError::not_found(format!("Folder {} not found", path)));
        }
        let parent = paths::parent_of(&path).unwrap_or(paths::ROOT);
        let target = paths::join(parent, &name);
        if target == path {
            return Ok(Folder::at(target));
        }
        if state.folders.contains(&target) {
            return Err(NoteError::conflict(format!("Folder {} already exists", target)));
        }

        let moved: Vec<String> = state
            .folders
            .iter()
            .filter(|folder| paths::is_within(folder, &path))
            .cloned()
            .collect();
        for folder in moved {
            state.folders.remove(&folder);
            if let Some(rebased) = paths::rebase(&folder, &path, &target) {
                state.folders.insert(rebased);
            }
        }
        for note in state.notes.values_mut() {
            if let Some(rebased) = paths::rebase(&note.folder_path, &path, &target) {
                note.folder_path = rebased;
            }
        }
        Ok(Folder::at(target))
    }

    async fn delete_folder(&self, session: &Session, path: &str) -> NoteResult<()> {
        self.enter(StoreOp::DeleteFolder, session, None).await?;
        let path = paths::normalize(path).map_err(rejected)?;

        let mut state = self.lock();
        if paths::is_root(&path) || !state.folders.contains(&path) {
            return Err(NoteError::not_found(format!("Folder {} not found", path)));
        }
        state.folders.retain(|folder| !paths::is_within(folder, &path));
        for note in state.notes.values_mut() {
            if paths::is_within(&note.folder_path, &path) {
                note.folder_path = paths::ROOT.to_string();
            }
        }
        Ok(())
    }

    async fn list_tags(&self, session: &Session) -> NoteResult<BTreeSet<String>> {
        self.enter(StoreOp::ListTags, session, None).await?;
        Ok(self
            .lock()
            .notes
            .values()
            .flat_map(|note| note.tags.iter().cloned())
            .collect())
    }

    async fn list_categories(&self, session: &Session) -> NoteResult<BTreeSet<String>> {
        self.enter(StoreOp::ListCategories, session, None).await?;
        Ok(self
            .lock()
            .notes
            .values()
            .map(|note| note.category.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{compose, QueryInputs};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use proptest::prelude::*;

    fn note(id: &str, title: &str, tags: &[&str], folder: &str, minute: i64) -> Note {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute);
        Note {
            id: id.to_string(),
            title: title.to_string(),
            content: format!("<p>{}</p>", title),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            category: "Work".to_string(),
            folder_path: folder.to_string(),
            images: vec![],
            is_favorite: false,
            is_archived: false,
            created_at: at,
            updated_at: at,
        }
    }

    fn ids(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_sorts_by_descriptor() {
        let store = MemoryNoteStore::new();
        store.insert_note(note("a", "beta", &[], "/", 1));
        store.insert_note(note("b", "Alpha", &[], "/", 2));
        store.insert_note(note("c", "gamma", &[], "/", 0));
        let session = Session::anonymous();

        let newest_first = store.list_notes(&session, &QueryDescriptor::all()).await.unwrap();
        assert_eq!(ids(&newest_first), vec!["b", "a", "c"]);

        let by_title = compose(&QueryInputs::default().sort(SortField::Title));
        let notes = store.list_notes(&session, &by_title).await.unwrap();
        assert_eq!(ids(&notes), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_search_and_tags_combine() {
        let store = MemoryNoteStore::new();
        store.insert_note(note("1", "Roadmap 2024", &["urgent"], "/", 0));
        store.insert_note(note("2", "roadmap draft", &[], "/", 1));
        store.insert_note(note("3", "Groceries", &["urgent"], "/", 2));
        let session = Session::anonymous();

        let query = compose(&QueryInputs::default().search("ROADMAP").tag("urgent"));
        let notes = store.list_notes(&session, &query).await.unwrap();
        assert_eq!(ids(&notes), vec!["1"]);
    }

    #[tokio::test]
    async fn test_archived_notes_only_in_archive() {
        let store = MemoryNoteStore::new();
        let mut archived = note("1", "old", &[], "/", 0);
        archived.is_archived = true;
        archived.is_favorite = true;
        store.insert_note(archived);
        let session = Session::anonymous();

        assert!(store.list_notes(&session, &QueryDescriptor::all()).await.unwrap().is_empty());
        assert!(store.list_notes(&session, &QueryDescriptor::favorites()).await.unwrap().is_empty());
        assert_eq!(store.list_notes(&session, &QueryDescriptor::archived()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_folder_rewrites_notes_and_descendants() {
        let store = MemoryNoteStore::new();
        store.insert_folder("/Work/2024").unwrap();
        store.insert_note(note("n", "N", &[], "/Work/2024", 0));
        let session = Session::anonymous();

        let renamed = store.rename_folder(&session, "/Work", "Projects").await.unwrap();
        assert_eq!(renamed, Folder::at("/Projects"));
        assert_eq!(store.folders(), vec!["/Projects", "/Projects/2024"]);
        assert_eq!(store.note("n").unwrap().folder_path, "/Projects/2024");
    }

    #[tokio::test]
    async fn test_delete_folder_promotes_notes_to_root() {
        let store = MemoryNoteStore::new();
        store.insert_folder("/Work/2024").unwrap();
        store.insert_folder("/Home").unwrap();
        store.insert_note(note("direct", "d", &[], "/Work", 0));
        store.insert_note(note("nested", "n", &[], "/Work/2024", 1));
        let session = Session::anonymous();

        store.delete_folder(&session, "/Work").await.unwrap();
        assert_eq!(store.folders(), vec!["/Home"]);
        assert_eq!(store.note("direct").unwrap().folder_path, "/");
        assert_eq!(store.note("nested").unwrap().folder_path, "/");
    }

    #[tokio::test]
    async fn test_folder_conflicts_and_missing_parents() {
        let store = MemoryNoteStore::new();
        let session = Session::anonymous();
        store.create_folder(&session, "/", "Work").await.unwrap();

        let err = store.create_folder(&session, "/", "Work").await.unwrap_err();
        assert!(matches!(err, NoteError::Conflict(_)));

        let err = store.create_folder(&session, "/Missing", "x").await.unwrap_err();
        assert!(matches!(err, NoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let store = MemoryNoteStore::new();
        let session = Session::anonymous();
        store.fail_next(StoreOp::ListTags, NoteError::Transport("offline".to_string()));

        assert!(store.list_tags(&session).await.is_err());
        assert!(store.list_tags(&session).await.is_ok());
        assert_eq!(store.calls(StoreOp::ListTags), 2);
    }

    #[tokio::test]
    async fn test_required_token() {
        let store = MemoryNoteStore::new();
        store.require_token(Some("good".to_string()));

        let err = store.list_categories(&Session::anonymous()).await.unwrap_err();
        assert!(err.is_auth());
        let ok = store
            .list_categories(&Session::with_token(Some("good".to_string())))
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_server_validation_is_remote() {
        let store = MemoryNoteStore::new();
        let err = store
            .create_note(&Session::anonymous(), &NoteDraft::new("", "c", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, NoteError::Remote(_)));
    }

    fn tagged_notes() -> impl Strategy<Value = Vec<BTreeSet<String>>> {
        proptest::collection::vec(proptest::collection::btree_set("[a-d]", 0..4), 0..12)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Every listed note carries all selected tags, and no note carrying
        /// them all is left out.
        #[test]
        fn prop_tag_filter_is_and(
            tag_sets in tagged_notes(),
            filter in proptest::collection::btree_set("[a-d]", 1..3),
        ) {
            let store = MemoryNoteStore::new();
            for (i, tags) in tag_sets.iter().enumerate() {
                let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                store.insert_note(note(&i.to_string(), "t", &tags, "/", i as i64));
            }
            let mut inputs = QueryInputs::default();
            inputs.tags = filter.iter().cloned().collect();
            let query = compose(&inputs);

            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let listed = runtime
                .block_on(store.list_notes(&Session::anonymous(), &query))
                .unwrap();

            for note in &listed {
                prop_assert!(filter.iter().all(|t| note.tags.contains(t)));
            }
            let expected = tag_sets.iter().filter(|tags| filter.is_subset(tags)).count();
            prop_assert_eq!(listed.len(), expected);
        }
    }
}
