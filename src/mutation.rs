use std::sync::Arc;

use uuid::Uuid;

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, NoteDraft, NoteUpdate};
use crate::paths;
use crate::query::ViewKind;
use crate::session::Session;
use crate::store::NoteStore;
use crate::sync::{SyncScheduler, ViewId};
use crate::tree::FolderTree;
use crate::view::ViewCache;

/// Applies note and folder changes against the remote store and keeps the
/// mounted views in line with them.
///
/// Each note operation takes the view the change was made from, if any.
/// Deletes, toggles and moves edit that view's list up front and roll the
/// edit back if the store refuses; creates and updates mark the item pending
/// and wait for the stored record. Other views are refreshed in the
/// background after a successful change.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: Arc<dyn NoteStore>,
    session: Session,
    scheduler: SyncScheduler,
    tree: FolderTree,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<dyn NoteStore>,
        session: Session,
        scheduler: SyncScheduler,
        tree: FolderTree,
    ) -> Self {
        Self {
            store,
            session,
            scheduler,
            tree,
        }
    }

    fn active_cache(&self, view: Option<ViewId>) -> NoteResult<Option<Arc<ViewCache>>> {
        view.map(|id| self.scheduler.cache(id)).transpose()
    }

    fn reconcile_others(&self, view: Option<ViewId>) {
        self.scheduler.refresh_all_except(view);
    }

    /// Creates a note from `draft`.
    ///
    /// Fails with `Validation` before any remote call when title, category
    /// or content is empty.
    pub async fn create_note(&self, view: Option<ViewId>, draft: NoteDraft) -> NoteResult<Note> {
        let draft = draft.validated()?;
        let cache = self.active_cache(view)?;

        let placeholder = format!("pending-{}", Uuid::new_v4());
        if let Some(cache) = &cache {
            cache.set_pending(&placeholder, true);
        }
        let outcome = self.store.create_note(&self.session, &draft).await;
        if let Some(cache) = &cache {
            cache.set_pending(&placeholder, false);
        }

        let note = outcome.inspect_err(|e| log::warn!("Creating note failed: {}", e))?;
        if let Some(cache) = &cache {
            cache.insert_front(note.clone());
        }
        log::info!("Created note {}", note.id);
        self.reconcile_others(view);
        Ok(note)
    }

    /// Updates the fields present in `update` and swaps in the stored record.
    pub async fn update_note(&self, view: Option<ViewId>, id: &str, update: NoteUpdate) -> NoteResult<Note> {
        if update.is_empty() {
            return Err(NoteError::validation("Nothing to update"));
        }
        let update = update.validated()?;
        let cache = self.active_cache(view)?;

        if let Some(cache) = &cache {
            cache.set_pending(id, true);
        }
        let outcome = self.store.update_note(&self.session, id, &update).await;
        if let Some(cache) = &cache {
            cache.set_pending(id, false);
        }

        let note = outcome.inspect_err(|e| log::warn!("Updating note {} failed: {}", id, e))?;
        if let Some(cache) = &cache {
            cache.replace_note(note.clone());
        }
        log::info!("Updated note {}", id);
        self.reconcile_others(view);
        Ok(note)
    }

    pub async fn delete_note(&self, view: Option<ViewId>, id: &str) -> NoteResult<()> {
        let cache = self.active_cache(view)?;
        let edit = cache.map(|cache| cache.apply_optimistic(|notes| notes.retain(|n| n.id != id)));

        match self.store.delete_note(&self.session, id).await {
            Ok(()) => {
                if let Some(edit) = edit {
                    edit.commit(None);
                }
                log::info!("Deleted note {}", id);
                self.reconcile_others(view);
                Ok(())
            }
            Err(err) => {
                if let Some(edit) = edit {
                    edit.rollback();
                }
                log::warn!("Deleting note {} failed, rolled back: {}", id, err);
                Err(err)
            }
        }
    }

    /// Flips the favorite flag. Returns the stored note.
    pub async fn toggle_favorite(&self, view: Option<ViewId>, id: &str) -> NoteResult<Note> {
        let current = self.current_note(view, id).await?;
        self.apply_flagged(view, id, NoteUpdate::favorite(!current.is_favorite))
            .await
    }

    /// Flips the archived flag. Returns the stored note.
    pub async fn toggle_archive(&self, view: Option<ViewId>, id: &str) -> NoteResult<Note> {
        let current = self.current_note(view, id).await?;
        self.apply_flagged(view, id, NoteUpdate::archived(!current.is_archived))
            .await
    }

    /// Reassigns a note to `folder_path`; an empty path means the root.
    pub async fn move_note(&self, view: Option<ViewId>, id: &str, folder_path: &str) -> NoteResult<Note> {
        let folder = paths::assign_folder(Some(folder_path))?;
        self.apply_flagged(view, id, NoteUpdate::folder(folder)).await
    }

    /// The note as the active view shows it, or as the store has it.
    async fn current_note(&self, view: Option<ViewId>, id: &str) -> NoteResult<Note> {
        if let Some(cache) = self.active_cache(view)? {
            if let Some(note) = cache.snapshot().note(id) {
                return Ok(note.clone());
            }
        }
        self.store.get_note(&self.session, id).await
    }

    /// Applies `update` to the active view ahead of the store. A note that
    /// leaves the view's scope disappears from it at once.
    async fn apply_flagged(&self, view: Option<ViewId>, id: &str, update: NoteUpdate) -> NoteResult<Note> {
        let update = update.validated()?;
        let cache = self.active_cache(view)?;
        let edit = cache.map(|cache| {
            let descriptor = cache.descriptor();
            cache.apply_optimistic(|notes| {
                if let Some(index) = notes.iter().position(|n| n.id == id) {
                    update.apply_to(&mut notes[index]);
                    if !descriptor.scope_admits(&notes[index]) {
                        notes.remove(index);
                    }
                }
            })
        });

        match self.store.update_note(&self.session, id, &update).await {
            Ok(note) => {
                if let Some(edit) = edit {
                    edit.commit(Some(note.clone()));
                }
                log::info!("Updated note {}", id);
                self.reconcile_others(view);
                Ok(note)
            }
            Err(err) => {
                if let Some(edit) = edit {
                    edit.rollback();
                }
                log::warn!("Updating note {} failed, rolled back: {}", id, err);
                Err(err)
            }
        }
    }

    /// Creates a folder. See [`FolderTree::create`].
    pub async fn create_folder(&self, parent_path: &str, name: &str) -> NoteResult<String> {
        self.tree.create(parent_path, name).await
    }

    /// Renames a folder and re-points folder views under it.
    ///
    /// Notes are not rewritten locally; every view fetches again so note
    /// folder paths come from the store.
    pub async fn rename_folder(&self, path: &str, new_name: &str) -> NoteResult<String> {
        let old = paths::normalize(path)?;
        let new = self.tree.rename(&old, new_name).await?;
        if new != old {
            self.repoint_folder_views(|folder| paths::rebase(folder, &old, &new));
        }
        Ok(new)
    }

    /// Deletes a folder. Views showing it or anything below it switch to
    /// the parent folder; every view fetches again so promoted notes show up.
    pub async fn delete_folder(&self, path: &str) -> NoteResult<()> {
        let old = paths::normalize(path)?;
        let parent = self.tree.delete(&old).await?;
        self.repoint_folder_views(|folder| paths::is_within(folder, &old).then(|| parent.clone()));
        Ok(())
    }

    /// Moves each by-folder view for which `remap` yields a new path and
    /// refreshes all other views.
    fn repoint_folder_views<F>(&self, remap: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (id, descriptor) in self.scheduler.descriptors() {
            let target = match (descriptor.view_kind(), descriptor.folder_path()) {
                (ViewKind::ByFolder, Some(folder)) => remap(folder),
                _ => None,
            };
            let outcome = match target {
                Some(target) => {
                    log::debug!("Re-pointing {} to folder {}", id, target);
                    self.scheduler
                        .set_descriptor(id, descriptor.with_folder_path(&target))
                }
                None => self.scheduler.refresh_now(id),
            };
            if let Err(err) = outcome {
                log::debug!("Skipping {}: {}", id, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryDescriptor;
    use crate::store::memory::{MemoryNoteStore, StoreOp};
    use crate::sync::DEFAULT_POLL_INTERVAL;
    use crate::view::ViewStatus;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;
    use tokio::time::sleep;

    fn note(id: &str, minute: i64) -> Note {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute);
        Note {
            id: id.to_string(),
            title: format!("Note {}", id),
            content: "<p>body</p>".to_string(),
            tags: Default::default(),
            category: "Work".to_string(),
            folder_path: "/".to_string(),
            images: vec![],
            is_favorite: false,
            is_archived: false,
            created_at: at,
            updated_at: at,
        }
    }

    struct Fixture {
        store: Arc<MemoryNoteStore>,
        scheduler: SyncScheduler,
        tree: FolderTree,
        mutations: MutationCoordinator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryNoteStore::new());
        store.insert_note(note("a", 1));
        store.insert_note(note("b", 2));
        let session = Session::anonymous();
        let scheduler = SyncScheduler::new(store.clone(), session.clone(), DEFAULT_POLL_INTERVAL);
        let tree = FolderTree::new(store.clone(), session.clone());
        let mutations = MutationCoordinator::new(store.clone(), session, scheduler.clone(), tree.clone());
        Fixture {
            store,
            scheduler,
            tree,
            mutations,
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn ids(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_validates_before_remote_call() {
        let f = fixture();
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;
        let before = view.state();

        let err = f
            .mutations
            .create_note(Some(view.id()), NoteDraft::new("Title", "", "Work"))
            .await
            .unwrap_err();
        assert_eq!(err, NoteError::Validation("Content is required".to_string()));
        assert_eq!(f.store.calls(StoreOp::CreateNote), 0);
        assert_eq!(view.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_marks_pending_then_inserts() {
        let f = fixture();
        f.store.set_latency(StoreOp::CreateNote, Duration::from_secs(2));
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;

        let mutations = f.mutations.clone();
        let id = view.id();
        let task = tokio::spawn(async move {
            mutations
                .create_note(Some(id), NoteDraft::new("Fresh", "<p>x</p>", "Work"))
                .await
        });
        settle().await;
        assert_eq!(view.state().pending.len(), 1);

        let created = task.await.unwrap().unwrap();
        let state = view.state();
        assert!(state.pending.is_empty());
        assert_eq!(state.notes[0].id, created.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_favorite_failure_restores_exactly() {
        let f = fixture();
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;
        let before = view.state();

        f.store
            .fail_next(StoreOp::UpdateNote, NoteError::Remote("nope".to_string()));
        let err = f.mutations.toggle_favorite(Some(view.id()), "a").await.unwrap_err();
        assert_eq!(err, NoteError::Remote("nope".to_string()));

        let after = view.state();
        assert_eq!(after.notes, before.notes);
        assert!(!after.note("a").unwrap().is_favorite);
        assert!(after.pending.is_empty());
        assert!(!f.store.note("a").unwrap().is_favorite);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_favorite_is_optimistic() {
        let f = fixture();
        f.store.set_latency(StoreOp::UpdateNote, Duration::from_secs(2));
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;

        let mutations = f.mutations.clone();
        let id = view.id();
        let task = tokio::spawn(async move { mutations.toggle_favorite(Some(id), "a").await });
        settle().await;
        assert!(view.state().note("a").unwrap().is_favorite);

        let stored = task.await.unwrap().unwrap();
        assert!(stored.is_favorite);
        assert!(view.state().note("a").unwrap().is_favorite);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfavorite_removes_from_favorites_view() {
        let f = fixture();
        let mut fav = note("c", 3);
        fav.is_favorite = true;
        f.store.insert_note(fav);
        let view = f.scheduler.register(QueryDescriptor::favorites());
        settle().await;
        assert_eq!(ids(&view.state().notes), vec!["c"]);

        f.mutations.toggle_favorite(Some(view.id()), "c").await.unwrap();
        assert!(view.state().notes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_archive_hides_note_and_refreshes_other_views() {
        let f = fixture();
        let all = f.scheduler.register(QueryDescriptor::all());
        let archive = f.scheduler.register(QueryDescriptor::archived());
        settle().await;
        assert!(archive.state().notes.is_empty());

        f.mutations.toggle_archive(Some(all.id()), "a").await.unwrap();
        assert_eq!(ids(&all.state().notes), vec!["b"]);

        settle().await;
        assert_eq!(ids(&archive.state().notes), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_rolls_back_on_failure() {
        let f = fixture();
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;

        f.store
            .fail_next(StoreOp::DeleteNote, NoteError::Transport("offline".to_string()));
        assert!(f.mutations.delete_note(Some(view.id()), "a").await.is_err());
        assert_eq!(ids(&view.state().notes), vec!["b", "a"]);

        f.mutations.delete_note(Some(view.id()), "a").await.unwrap();
        assert_eq!(ids(&view.state().notes), vec!["b"]);
        assert!(f.store.note("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_keeps_overlapping_delete() {
        let f = fixture();
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;
        f.store.set_latency(StoreOp::DeleteNote, Duration::from_secs(2));
        f.store
            .fail_next(StoreOp::DeleteNote, NoteError::Transport("offline".to_string()));

        let id = view.id();
        let mutations = f.mutations.clone();
        let first = tokio::spawn(async move { mutations.delete_note(Some(id), "a").await });
        settle().await;
        let mutations = f.mutations.clone();
        let second = tokio::spawn(async move { mutations.delete_note(Some(id), "b").await });
        settle().await;
        assert!(view.state().notes.is_empty());

        assert!(first.await.unwrap().is_err());
        second.await.unwrap().unwrap();
        assert!(f.store.note("b").is_none());
        assert_eq!(ids(&view.state().notes), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_replaces_with_stored_record() {
        let f = fixture();
        let view = f.scheduler.register(QueryDescriptor::all());
        settle().await;

        let update = NoteUpdate {
            title: Some("  Renamed ".to_string()),
            ..Default::default()
        };
        let stored = f.mutations.update_note(Some(view.id()), "a", update).await.unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(view.state().note("a").unwrap().title, "Renamed");

        let err = f
            .mutations
            .update_note(Some(view.id()), "a", NoteUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_note_out_of_folder_view() {
        let f = fixture();
        f.store.insert_folder("/Work").unwrap();
        let mut filed = note("w", 5);
        filed.folder_path = "/Work".to_string();
        f.store.insert_note(filed);
        let view = f.scheduler.register(QueryDescriptor::by_folder("/Work"));
        settle().await;

        let moved = f.mutations.move_note(Some(view.id()), "w", "").await.unwrap();
        assert_eq!(moved.folder_path, "/");
        assert!(view.state().notes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_folder_repoints_folder_views() {
        let f = fixture();
        f.store.insert_folder("/Work/2024").unwrap();
        let mut filed = note("n", 5);
        filed.folder_path = "/Work/2024".to_string();
        f.store.insert_note(filed);
        f.tree.load_children("/").await.unwrap();

        let view = f.scheduler.register(QueryDescriptor::by_folder("/Work/2024"));
        settle().await;
        assert_eq!(ids(&view.state().notes), vec!["n"]);

        let renamed = f.mutations.rename_folder("/Work", "Projects").await.unwrap();
        assert_eq!(renamed, "/Projects");
        settle().await;

        let state = view.state();
        assert_eq!(state.descriptor.folder_path(), Some("/Projects/2024"));
        assert_eq!(state.status, ViewStatus::Ready);
        assert_eq!(ids(&state.notes), vec!["n"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_folder_moves_views_to_parent() {
        let f = fixture();
        f.store.insert_folder("/Work").unwrap();
        let mut filed = note("w", 5);
        filed.folder_path = "/Work".to_string();
        f.store.insert_note(filed);
        f.tree.load_children("/").await.unwrap();

        let folder_view = f.scheduler.register(QueryDescriptor::by_folder("/Work"));
        let all = f.scheduler.register(QueryDescriptor::all());
        settle().await;

        f.mutations.delete_folder("/Work").await.unwrap();
        settle().await;

        let state = folder_view.state();
        assert_eq!(state.descriptor.folder_path(), Some("/"));
        assert!(ids(&state.notes).contains(&"w"));
        assert_eq!(all.state().note("w").unwrap().folder_path, "/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_view_is_not_found() {
        let f = fixture();
        let view = f.scheduler.register(QueryDescriptor::all());
        f.scheduler.unregister(view.id());

        let err = f.mutations.delete_note(Some(view.id()), "a").await.unwrap_err();
        assert!(matches!(err, NoteError::NotFound(_)));
        assert_eq!(f.store.calls(StoreOp::DeleteNote), 0);
    }
}
