//! Lazily populated folder hierarchy.
//!
//! Folders are kept in a flat map keyed by canonical path. Parent and child
//! relations are derived from the paths on demand, so a rename is a prefix
//! substitution over the keys and a delete is a range removal.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{NoteError, NoteResult};
use crate::models::Folder;
use crate::paths::{self, Crumb};
use crate::session::Session;
use crate::store::NoteStore;

/// Answer of [`FolderTree::get_children`].
#[derive(Debug, Clone, PartialEq)]
pub enum Children {
    /// A listing is in flight; ask again or await [`FolderTree::load_children`].
    Loading,
    Loaded(Vec<Folder>),
    /// The last listing failed. Only [`FolderTree::reload`] retries.
    Failed(NoteError),
}

enum LoadState {
    Loading {
        seq: u64,
        done: watch::Receiver<bool>,
        task: JoinHandle<()>,
    },
    Loaded,
    Failed(NoteError),
}

impl LoadState {
    fn cancel(&self) {
        if let LoadState::Loading { task, .. } = self {
            task.abort();
        }
    }
}

#[derive(Default)]
struct TreeState {
    nodes: BTreeMap<String, Folder>,
    loads: HashMap<String, LoadState>,
    next_load: u64,
}

impl TreeState {
    fn contains(&self, path: &str) -> bool {
        paths::is_root(path) || self.nodes.contains_key(path)
    }

    fn children(&self, parent: &str) -> Vec<Folder> {
        self.nodes
            .values()
            .filter(|folder| paths::parent_of(&folder.path) == Some(parent))
            .cloned()
            .collect()
    }

    /// Drops `path`, every folder below it and their load state.
    fn remove_subtree(&mut self, path: &str) {
        self.nodes.retain(|key, _| !paths::is_within(key, path));
        self.loads.retain(|key, load| {
            let keep = !paths::is_within(key, path);
            if !keep {
                load.cancel();
            }
            keep
        });
    }

    /// Replaces the known children of `parent` with a fresh listing.
    ///
    /// Entries that are not direct children of `parent` are ignored. Children
    /// missing from the listing are removed along with their subtrees.
    fn merge_children(&mut self, parent: &str, listed: Vec<Folder>) {
        let mut fresh = BTreeMap::new();
        for folder in listed {
            match paths::normalize(&folder.path) {
                Ok(path) if paths::parent_of(&path) == Some(parent) => {
                    fresh.insert(path.clone(), Folder::at(path));
                }
                _ => log::warn!("Ignoring folder '{}' listed under {}", folder.path, parent),
            }
        }

        let stale: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| paths::parent_of(path) == Some(parent) && !fresh.contains_key(*path))
            .cloned()
            .collect();
        for path in stale {
            log::debug!("Folder {} vanished remotely", path);
            self.remove_subtree(&path);
        }
        self.nodes.extend(fresh);
    }

    /// Moves `old` and everything below it to `new`. In-flight listings
    /// under `old` are cancelled; settled load state moves with its path.
    fn rebase_subtree(&mut self, old: &str, new: &str) {
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| paths::is_within(path, old))
            .cloned()
            .collect();
        for path in moved {
            self.nodes.remove(&path);
            if let Some(rebased) = paths::rebase(&path, old, new) {
                self.nodes.insert(rebased.clone(), Folder::at(rebased));
            }
        }

        let keys: Vec<String> = self
            .loads
            .keys()
            .filter(|path| paths::is_within(path, old))
            .cloned()
            .collect();
        for key in keys {
            let Some(load) = self.loads.remove(&key) else {
                continue;
            };
            match (&load, paths::rebase(&key, old, new)) {
                (LoadState::Loading { .. }, _) | (_, None) => load.cancel(),
                (_, Some(rebased)) => {
                    self.loads.insert(rebased, load);
                }
            }
        }
    }
}

struct TreeInner {
    store: Arc<dyn NoteStore>,
    session: Session,
    state: Mutex<TreeState>,
}

impl TreeInner {
    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawns a listing of `path`, replacing any listing already in flight
    /// for it. Returns a receiver that turns `true` once the listing settles.
    fn start_load(self: &Arc<Self>, state: &mut TreeState, path: String) -> watch::Receiver<bool> {
        state.next_load += 1;
        let seq = state.next_load;
        let (tx, done) = watch::channel(false);

        let weak: Weak<TreeInner> = Arc::downgrade(self);
        let store = Arc::clone(&self.store);
        let session = self.session.clone();
        let target = path.clone();
        let task = tokio::spawn(async move {
            let outcome = store.list_folder_contents(&session, &target).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_load(&target, seq, outcome);
            }
            let _ = tx.send(true);
        });

        log::debug!("Listing folder {}", path);
        let previous = state.loads.insert(
            path,
            LoadState::Loading {
                seq,
                done: done.clone(),
                task,
            },
        );
        if let Some(previous) = previous {
            previous.cancel();
        }
        done
    }

    fn finish_load(&self, path: &str, seq: u64, outcome: NoteResult<Vec<Folder>>) {
        let mut state = self.lock();
        let current = matches!(
            state.loads.get(path),
            Some(LoadState::Loading { seq: live, .. }) if *live == seq
        );
        if !current {
            log::debug!("Discarding superseded listing of {}", path);
            return;
        }
        match outcome {
            Ok(folders) => {
                state.merge_children(path, folders);
                state.loads.insert(path.to_string(), LoadState::Loaded);
            }
            Err(err) => {
                log::warn!("Listing folder {} failed: {}", path, err);
                state.loads.insert(path.to_string(), LoadState::Failed(err));
            }
        }
    }
}

/// Client-side view of the remote folder hierarchy.
///
/// Cloning yields another handle on the same tree. Listings run on the Tokio
/// runtime, at most one per path at a time.
#[derive(Clone)]
pub struct FolderTree {
    inner: Arc<TreeInner>,
}

impl FolderTree {
    pub fn new(store: Arc<dyn NoteStore>, session: Session) -> Self {
        Self {
            inner: Arc::new(TreeInner {
                store,
                session,
                state: Mutex::new(TreeState::default()),
            }),
        }
    }

    /// Direct children of `path`, starting a listing if none has been made.
    ///
    /// Repeated calls while a listing is in flight return
    /// [`Children::Loading`] without issuing another request.
    ///
    /// # Arguments
    /// * `path` - Folder path; normalized before use
    ///
    /// # Returns
    /// * `Ok(Children)` - Current load state of the path
    /// * `Err(NoteError::Validation)` - If the path is malformed
    pub fn get_children(&self, path: &str) -> NoteResult<Children> {
        let path = paths::normalize(path)?;
        let mut state = self.inner.lock();
        let children = match state.loads.get(&path) {
            Some(LoadState::Loaded) => Some(Children::Loaded(state.children(&path))),
            Some(LoadState::Failed(err)) => Some(Children::Failed(err.clone())),
            Some(LoadState::Loading { .. }) => Some(Children::Loading),
            None => None,
        };
        match children {
            Some(children) => Ok(children),
            None => {
                self.inner.start_load(&mut state, path);
                Ok(Children::Loading)
            }
        }
    }

    /// Awaiting form of [`FolderTree::get_children`]; joins a listing that
    /// is already in flight.
    pub async fn load_children(&self, path: &str) -> NoteResult<Vec<Folder>> {
        let path = paths::normalize(path)?;
        loop {
            let (seq, mut done) = {
                let mut state = self.inner.lock();
                let pending = match state.loads.get(&path) {
                    Some(LoadState::Loaded) => return Ok(state.children(&path)),
                    Some(LoadState::Failed(err)) => return Err(err.clone()),
                    Some(LoadState::Loading { seq, done, .. }) => Some((*seq, done.clone())),
                    None => None,
                };
                match pending {
                    Some(pending) => pending,
                    None => {
                        let done = self.inner.start_load(&mut state, path.clone());
                        (state.next_load, done)
                    }
                }
            };

            if done.wait_for(|finished| *finished).await.is_err() {
                // Listing task went away without settling. If it was not
                // replaced, record the failure so waiters do not spin.
                let mut state = self.inner.lock();
                let abandoned = matches!(
                    state.loads.get(&path),
                    Some(LoadState::Loading { seq: live, .. }) if *live == seq
                );
                if abandoned {
                    let err = NoteError::Transport(format!("Listing of {} was interrupted", path));
                    state.loads.insert(path.clone(), LoadState::Failed(err));
                }
            }
        }
    }

    /// Forces a fresh listing of `path`, superseding one in flight.
    pub fn reload(&self, path: &str) -> NoteResult<()> {
        let path = paths::normalize(path)?;
        let mut state = self.inner.lock();
        self.inner.start_load(&mut state, path);
        Ok(())
    }

    /// Forgets the load state of `path`; the next read lists it again.
    pub fn invalidate(&self, path: &str) -> NoteResult<()> {
        let path = paths::normalize(path)?;
        if let Some(load) = self.inner.lock().loads.remove(&path) {
            load.cancel();
        }
        Ok(())
    }

    /// Creates `name` under `parent_path` remotely and records it.
    ///
    /// # Returns
    /// * `Ok(String)` - Path of the new folder
    /// * `Err(NoteError::Validation)` - Empty or malformed name; nothing is sent
    /// * `Err(NoteError::NotFound)` - The parent is not known locally
    /// * `Err(NoteError::Conflict)` - A sibling already has that path
    pub async fn create(&self, parent_path: &str, name: &str) -> NoteResult<String> {
        let name = paths::validate_segment(name)?;
        let parent = paths::normalize(parent_path)?;
        let path = paths::join(&parent, &name);
        {
            let state = self.inner.lock();
            if !state.contains(&parent) {
                return Err(NoteError::not_found(format!("Folder {} not found", parent)));
            }
            if state.contains(&path) {
                return Err(NoteError::conflict(format!("Folder {} already exists", path)));
            }
        }

        let created = self
            .inner
            .store
            .create_folder(&self.inner.session, &parent, &name)
            .await?;
        let path = paths::normalize(&created.path).unwrap_or(path);
        self.inner
            .lock()
            .nodes
            .insert(path.clone(), Folder::at(path.clone()));
        log::info!("Created folder {}", path);
        Ok(path)
    }

    /// Renames the folder at `path`; every descendant path moves with it.
    ///
    /// # Returns
    /// * `Ok(String)` - The folder's new path
    /// * `Err(NoteError::Validation)` - Empty name, or `path` is the root
    /// * `Err(NoteError::NotFound)` - `path` is not known locally
    /// * `Err(NoteError::Conflict)` - A sibling already has the new path
    pub async fn rename(&self, path: &str, new_name: &str) -> NoteResult<String> {
        let name = paths::validate_segment(new_name)?;
        let path = paths::normalize(path)?;
        if paths::is_root(&path) {
            return Err(NoteError::validation("The root folder cannot be renamed"));
        }
        let parent = paths::parent_of(&path).unwrap_or(paths::ROOT);
        let target = paths::join(parent, &name);
        {
            let state = self.inner.lock();
            if !state.contains(&path) {
                return Err(NoteError::not_found(format!("Folder {} not found", path)));
            }
            if target == path {
                return Ok(target);
            }
            if state.contains(&target) {
                return Err(NoteError::conflict(format!("Folder {} already exists", target)));
            }
        }

        let renamed = self
            .inner
            .store
            .rename_folder(&self.inner.session, &path, &name)
            .await?;
        let target = paths::normalize(&renamed.path).unwrap_or(target);
        self.inner.lock().rebase_subtree(&path, &target);
        log::info!("Renamed folder {} to {}", path, target);
        Ok(target)
    }

    /// Deletes the folder at `path` and drops its cached subtree.
    ///
    /// The parent is listed again in the background so the tree reflects
    /// whatever the remote store did with nested folders.
    ///
    /// # Returns
    /// * `Ok(String)` - Path of the parent that is being re-listed
    pub async fn delete(&self, path: &str) -> NoteResult<String> {
        let path = paths::normalize(path)?;
        if paths::is_root(&path) {
            return Err(NoteError::validation("The root folder cannot be deleted"));
        }
        if !self.inner.lock().contains(&path) {
            return Err(NoteError::not_found(format!("Folder {} not found", path)));
        }

        self.inner
            .store
            .delete_folder(&self.inner.session, &path)
            .await?;

        let parent = paths::parent_of(&path).unwrap_or(paths::ROOT).to_string();
        let mut state = self.inner.lock();
        state.remove_subtree(&path);
        self.inner.start_load(&mut state, parent.clone());
        log::info!("Deleted folder {}", path);
        Ok(parent)
    }

    /// Root-to-`path` trail. The root entry is labelled distinctly; `""` and
    /// `"/"` both yield only the root.
    pub fn breadcrumbs(&self, path: &str) -> NoteResult<Vec<Crumb>> {
        let path = paths::normalize(path)?;
        Ok(paths::breadcrumbs(&path).collect())
    }

    pub fn folder(&self, path: &str) -> Option<Folder> {
        let path = paths::normalize(path).ok()?;
        if paths::is_root(&path) {
            return Some(Folder {
                name: paths::ROOT_LABEL.to_string(),
                path,
            });
        }
        self.inner.lock().nodes.get(&path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        match paths::normalize(path) {
            Ok(path) => self.inner.lock().contains(&path),
            Err(_) => false,
        }
    }

    /// Every folder known locally, in path order. The root is implicit.
    pub fn all(&self) -> Vec<Folder> {
        self.inner.lock().nodes.values().cloned().collect()
    }
}
